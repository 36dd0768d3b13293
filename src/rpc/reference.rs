use std::fmt;

use crate::rpc::protocol::{read_facet, write_facet};
use crate::stream::{InputStream, OutputStream};
use crate::{Corrupting, Result, Status};

/// Opaque object identity. An empty name is the null identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    pub name: String,
    pub category: String,
}

impl Identity {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), category: String::new() }
    }

    pub fn with_category(category: &str, name: &str) -> Self {
        Self { name: name.to_string(), category: category.to_string() }
    }

    /// `"category/name"` or just `"name"`.
    pub fn parse(s: &str) -> Result<Self> {
        let identity = match s.split_once('/') {
            Some((category, name)) => Self::with_category(category, name),
            None => Self::new(s),
        };
        if identity.is_null() {
            return Err(Status::corrupted(format!("identity {:?} has no name", s)));
        }
        Ok(identity)
    }

    pub fn is_null(&self) -> bool { self.name.is_empty() }

    pub fn write(&self, os: &mut OutputStream) -> Result<()> {
        os.write_string(&self.name)?;
        os.write_string(&self.category)
    }

    pub fn read(is: &mut InputStream) -> Result<Self> {
        let name = is.read_string()?;
        let category = is.read_string()?;
        Ok(Self { name, category })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.category.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.category, self.name)
        }
    }
}

/// Everything a proxy needs to address its target, independent of transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub identity: Identity,
    pub facet: String,
    pub oneway: bool,
}

impl Reference {
    pub fn new(identity: Identity) -> Self {
        Self { identity, facet: String::new(), oneway: false }
    }
}

/*
 * proxy: identity [facet mode]
 * a null identity stands for a null proxy and nothing else follows
 */
impl OutputStream {
    pub fn write_reference(&mut self, v: Option<&Reference>) -> Result<()> {
        match v {
            None => Identity::default().write(self),
            Some(r) => {
                if r.identity.is_null() {
                    return Err(Status::corrupted("proxy with null identity"));
                }
                r.identity.write(self)?;
                write_facet(self, &r.facet)?;
                self.write_byte(if r.oneway { 1 } else { 0 });
                Ok(())
            }
        }
    }
}

impl InputStream {
    pub fn read_reference(&mut self) -> Result<Option<Reference>> {
        let identity = Identity::read(self)?;
        if identity.is_null() {
            return Ok(None);
        }
        let facet = read_facet(self)?;
        let oneway = match self.read_byte()? {
            0 => false,
            1 => true,
            b => return Err(Status::corrupted(format!("invalid proxy mode {}", b))),
        };
        Ok(Some(Reference { identity, facet, oneway }))
    }
}
