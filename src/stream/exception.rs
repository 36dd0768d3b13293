use std::fmt;

use bytes::Bytes;

use crate::rpc::ROOT_TYPE_ID;
use crate::stream::{InputStream, OutputStream};
use crate::{Corrupting, Result, Status};

/// An application-declared error that travels by value.
///
/// Encoded like an object: one slice per level of the exception hierarchy,
/// most derived first, closed by the root slice. A receiver that only knows a
/// base exception decodes that base and ignores the newer slices.
pub trait UserException: fmt::Debug + Send + Sync + Sized + 'static {
    const TYPE_ID: &'static str;

    fn write_slices(&self, os: &mut OutputStream) -> Result<()>;

    /// Starts at the slice for `TYPE_ID`; the root slice is left to the caller.
    fn read_slices(is: &mut InputStream) -> Result<Self>;
}

/// A marshaled user exception. Kept encoded so it can cross the dispatch
/// layer without knowing its concrete type; `decode` recovers a typed value.
#[derive(Clone, PartialEq)]
pub struct UserError {
    ids: Vec<String>,
    data: Bytes,
}

impl UserError {
    pub fn new<E: UserException>(e: &E) -> Result<Self> {
        let mut os = OutputStream::new();
        e.write_slices(&mut os)?;
        os.write_root_slice()?;
        Self::from_wire(os.finished()?)
    }

    /// Validates the slice chain and collects its type ids.
    pub fn from_wire(data: Bytes) -> Result<Self> {
        let mut ids = Vec::new();
        let mut is = InputStream::new(&data);
        loop {
            let type_id = is.read_type_id()?;
            if type_id == ROOT_TYPE_ID {
                is.resume_slice(type_id);
                is.read_root_slice()?;
                break;
            }
            is.skip_slice()?;
            ids.push(type_id);
        }
        if ids.is_empty() {
            return Err(Status::corrupted("user exception without slices"));
        }
        if !is.is_exhausted() {
            return Err(Status::corrupted(format!("{} bytes after user exception", is.remaining())));
        }
        Ok(Self { ids, data })
    }

    pub fn type_id(&self) -> &str { &self.ids[0] }

    /// Most derived first.
    pub fn ids(&self) -> &[String] { &self.ids }

    pub fn is_a(&self, type_id: &str) -> bool {
        self.ids.iter().any(|id| id == type_id)
    }

    pub fn data(&self) -> &Bytes { &self.data }

    /// Slices down to `E` and decodes it.
    pub fn decode<E: UserException>(&self) -> Result<E> {
        let mut is = InputStream::new(&self.data);
        loop {
            let type_id = is.read_type_id()?;
            if type_id == E::TYPE_ID {
                is.resume_slice(type_id);
                return E::read_slices(&mut is);
            }
            if type_id == ROOT_TYPE_ID {
                return Err(Status::TypeMismatch {
                    expected: E::TYPE_ID.to_string(),
                    actual: self.type_id().to_string(),
                });
            }
            is.skip_slice()?;
        }
    }

    /// Picks the first id this receiver declared, if any.
    pub fn find_declared<'a>(&self, declared: &[&'a str]) -> Option<&'a str> {
        self.ids.iter()
            .find_map(|id| declared.iter().find(|d| **d == id.as_str()).copied())
    }
}

impl fmt::Debug for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserError")
            .field("ids", &self.ids)
            .field("len", &self.data.len())
            .finish()
    }
}

impl Status {
    /// Marshals `e` for the reply; an exception that cannot be marshaled
    /// degrades to `UnknownLocalException`.
    pub fn user<E: UserException>(e: &E) -> Status {
        match UserError::new(e) {
            Ok(error) => Status::UserException(error),
            Err(e) => Status::UnknownLocalException(format!("marshal user exception: {}", e)),
        }
    }
}
