use std::collections::BTreeMap;

use num_enum::TryFromPrimitive;

use crate::rpc::reference::Identity;
use crate::rpc::ROOT_TYPE_ID;
use crate::stream::{InputStream, OutputStream};
use crate::{Corrupting, Result, Status};

#[repr(u8)]
#[derive(PartialEq, Eq, Debug, Clone, Copy, TryFromPrimitive)]
pub enum OperationMode {
    Normal,
    // read-only
    Nonmutating,
    Idempotent,
}

impl OperationMode {
    /// Safe to send again after a transport failure.
    pub fn is_retryable(self) -> bool {
        self != OperationMode::Normal
    }

    /// Whether an operation declared with `self` may be invoked by a caller
    /// that declared `caller`.
    pub fn accepts(self, caller: OperationMode) -> bool {
        self == caller || (self == OperationMode::Idempotent && caller == OperationMode::Nonmutating)
    }
}

#[repr(u8)]
#[derive(PartialEq, Eq, Debug, Clone, Copy, TryFromPrimitive)]
pub enum ReplyStatus {
    Ok,
    UserException,
    ObjectNotExist,
    FacetNotExist,
    OperationNotExist,
    UnknownLocalException,
    UnknownUserException,
    UnknownException,
}

/// Wire shape of a parameter or result, recorded on the descriptor.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Shape {
    Void,
    Bool,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Sequence(&'static Shape),
    Dictionary(&'static Shape, &'static Shape),
    Struct(&'static str),
    Object(&'static str),
    Proxy(&'static str),
}

impl Shape {
    /// Values of this shape go through the object graph codec.
    pub fn has_objects(&self) -> bool {
        match self {
            Shape::Object(_) => true,
            Shape::Sequence(e) => e.has_objects(),
            Shape::Dictionary(k, v) => k.has_objects() || v.has_objects(),
            _ => false,
        }
    }
}

#[derive(Debug)]
pub struct OperationDescriptor {
    pub name: &'static str,
    pub mode: OperationMode,
    pub params: &'static [Shape],
    pub returns: Shape,
    /// Type ids of the user exceptions the operation may raise.
    pub throws: &'static [&'static str],
    pub declared_by: &'static str,
}

impl OperationDescriptor {
    pub const fn new(name: &'static str, mode: OperationMode, declared_by: &'static str) -> Self {
        Self {
            name,
            mode,
            params: &[],
            returns: Shape::Void,
            throws: &[],
            declared_by,
        }
    }

    pub const fn params(self, params: &'static [Shape]) -> Self {
        Self { params, ..self }
    }

    pub const fn returns(self, returns: Shape) -> Self {
        Self { returns, ..self }
    }

    pub const fn throws(self, throws: &'static [&'static str]) -> Self {
        Self { throws, ..self }
    }

    pub fn returns_value(&self) -> bool {
        self.returns != Shape::Void
    }

    /// Parameter and result encapsulations carry a pending-object section.
    pub fn uses_objects(&self) -> bool {
        self.returns.has_objects() || self.params.iter().any(Shape::has_objects)
    }

    pub fn declares(&self, exception_id: &str) -> bool {
        self.throws.iter().any(|id| *id == exception_id)
    }
}

pub static OP_PING: OperationDescriptor =
    OperationDescriptor::new("_ping", OperationMode::Nonmutating, ROOT_TYPE_ID);
pub static OP_IS_A: OperationDescriptor =
    OperationDescriptor::new("_isA", OperationMode::Nonmutating, ROOT_TYPE_ID)
        .params(&[Shape::String])
        .returns(Shape::Bool);
pub static OP_IDS: OperationDescriptor =
    OperationDescriptor::new("_ids", OperationMode::Nonmutating, ROOT_TYPE_ID)
        .returns(Shape::Sequence(&Shape::String));
pub static OP_ID: OperationDescriptor =
    OperationDescriptor::new("_id", OperationMode::Nonmutating, ROOT_TYPE_ID)
        .returns(Shape::String);

pub type Context = BTreeMap<String, String>;

pub fn write_context(os: &mut OutputStream, context: &Context) -> Result<()> {
    os.write_size(context.len())?;
    for (k, v) in context {
        os.write_string(k)?;
        os.write_string(v)?;
    }
    Ok(())
}

pub fn read_context(is: &mut InputStream) -> Result<Context> {
    let n = is.read_and_check_seq_size(2)?;
    let mut context = Context::new();
    for _ in 0..n {
        let k = is.read_string()?;
        let v = is.read_string()?;
        context.insert(k, v);
    }
    Ok(context)
}

/// The facet travels as a sequence holding zero or one name.
pub fn write_facet(os: &mut OutputStream, facet: &str) -> Result<()> {
    if facet.is_empty() {
        os.write_size(0)
    } else {
        os.write_string_seq(&[facet])
    }
}

pub fn read_facet(is: &mut InputStream) -> Result<String> {
    let mut facets = is.read_string_seq()?;
    match facets.len() {
        0 => Ok(String::new()),
        1 => Ok(facets.remove(0)),
        n => Err(Status::corrupted(format!("{} facets in one path", n))),
    }
}

/*
 * request:
 * +------------+----------+-------+-----------+------+---------+--------+
 * | request id | identity | facet | operation | mode | context | params |
 * | i32        | 2 string | seq   | string    | u8   | dict    | encaps |
 * +------------+----------+-------+-----------+------+---------+--------+
 * request id 0 means oneway: no reply is sent.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHeader {
    pub request_id: i32,
    pub identity: Identity,
    pub facet: String,
    pub operation: String,
    pub mode: OperationMode,
    pub context: Context,
}

impl RequestHeader {
    pub fn write(&self, os: &mut OutputStream) -> Result<()> {
        os.write_int(self.request_id);
        self.identity.write(os)?;
        write_facet(os, &self.facet)?;
        os.write_string(&self.operation)?;
        os.write_byte(self.mode as u8);
        write_context(os, &self.context)
    }

    pub fn read(is: &mut InputStream) -> Result<Self> {
        let request_id = is.read_int()?;
        let identity = Identity::read(is)?;
        let facet = read_facet(is)?;
        let operation = is.read_string()?;
        let raw_mode = is.read_byte()?;
        let mode = match OperationMode::try_from_primitive(raw_mode) {
            Ok(mode) => mode,
            Err(_) => return Err(Status::corrupted(format!("invalid operation mode {}", raw_mode))),
        };
        let context = read_context(is)?;
        Ok(Self { request_id, identity, facet, operation, mode, context })
    }

    pub fn is_oneway(&self) -> bool { self.request_id == 0 }
}

/*
 * reply:
 * +------------+--------+-------------------------------------------+
 * | request id | status | body                                      |
 * | i32        | u8     | Ok, UserException: encaps                 |
 * |            |        | *NotExist: identity, facet, operation     |
 * |            |        | Unknown*: string                          |
 * +------------+--------+-------------------------------------------+
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplyHeader {
    pub request_id: i32,
    pub status: ReplyStatus,
}

impl ReplyHeader {
    pub fn write(&self, os: &mut OutputStream) {
        os.write_int(self.request_id);
        os.write_byte(self.status as u8);
    }

    pub fn read(is: &mut InputStream) -> Result<Self> {
        let request_id = is.read_int()?;
        let raw_status = is.read_byte()?;
        match ReplyStatus::try_from_primitive(raw_status) {
            Ok(status) => Ok(Self { request_id, status }),
            Err(_) => Err(Status::corrupted(format!("invalid reply status {}", raw_status))),
        }
    }
}
