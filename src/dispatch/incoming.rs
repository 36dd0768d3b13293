use bytes::Bytes;

use crate::rpc::{Context, Identity, OperationDescriptor, OperationMode, RequestHeader};
use crate::stream::{InputStream, OutputStream};
use crate::Result;

/// Per-request information handed to servants.
#[derive(Debug, Clone, PartialEq)]
pub struct Current {
    pub request_id: i32,
    pub identity: Identity,
    pub facet: String,
    pub operation: String,
    pub mode: OperationMode,
    pub context: Context,
}

impl From<RequestHeader> for Current {
    fn from(header: RequestHeader) -> Self {
        Self {
            request_id: header.request_id,
            identity: header.identity,
            facet: header.facet,
            operation: header.operation,
            mode: header.mode,
            context: header.context,
        }
    }
}

/// One request being dispatched: the undecoded parameters and the result
/// under construction. Thunks read parameters, call the servant, and write
/// the result through it.
pub struct Incoming {
    current: Current,
    params: InputStream,
    descriptor: Option<&'static OperationDescriptor>,
    result: Option<Bytes>,
}

impl Incoming {
    /// `params` must be positioned at the parameter encapsulation.
    pub fn new(current: Current, params: InputStream) -> Self {
        Self { current, params, descriptor: None, result: None }
    }

    pub fn current(&self) -> &Current { &self.current }

    pub fn descriptor(&self) -> Option<&'static OperationDescriptor> { self.descriptor }

    pub(crate) fn bind(&mut self, descriptor: &'static OperationDescriptor) {
        self.descriptor = Some(descriptor);
    }

    fn uses_objects(&self) -> bool {
        self.descriptor.map(|d| d.uses_objects()).unwrap_or(false)
    }

    pub fn read_params<R, F>(&mut self, f: F) -> Result<R>
        where F: FnOnce(&mut InputStream) -> Result<R> {
        self.params.start_read_encaps()?;
        let rs = f(&mut self.params)?;
        if self.uses_objects() {
            self.params.read_pending_objects()?;
        }
        self.params.end_read_encaps()?;
        Ok(rs)
    }

    pub fn read_empty_params(&mut self) -> Result<()> {
        self.read_params(|_| Ok(()))
    }

    pub fn write_result<F>(&mut self, f: F) -> Result<()>
        where F: FnOnce(&mut OutputStream) -> Result<()> {
        let mut os = OutputStream::new();
        os.start_encaps();
        f(&mut os)?;
        if self.uses_objects() {
            os.write_pending_objects()?;
        }
        os.end_encaps()?;
        self.result = Some(os.finished()?);
        Ok(())
    }

    pub fn write_empty_result(&mut self) -> Result<()> {
        self.write_result(|_| Ok(()))
    }

    /// The result encapsulation, empty if the thunk wrote none.
    pub(crate) fn take_result(&mut self) -> Result<Bytes> {
        match self.result.take() {
            Some(result) => Ok(result),
            None => {
                let mut os = OutputStream::new();
                os.write_empty_encaps()?;
                os.finished()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{Shape, ROOT_TYPE_ID};

    static SET_ID: OperationDescriptor =
        OperationDescriptor::new("setId", OperationMode::Normal, ROOT_TYPE_ID).params(&[Shape::String]);

    fn current() -> Current {
        Current {
            request_id: 1,
            identity: Identity::new("reader"),
            facet: String::new(),
            operation: "setId".into(),
            mode: OperationMode::Normal,
            context: Context::new(),
        }
    }

    #[test]
    fn sanity() {
        let mut os = OutputStream::new();
        os.start_encaps();
        os.write_string("a.tif").unwrap();
        os.end_encaps().unwrap();

        let mut incoming = Incoming::new(current(), InputStream::new(os.as_slice()));
        incoming.bind(&SET_ID);
        let id = incoming.read_params(|is| is.read_string()).unwrap();
        assert_eq!("a.tif", id);

        // nothing written: empty encapsulation
        let result = incoming.take_result().unwrap();
        assert_eq!(&[6, 0, 0, 0, 1, 0], &result[..]);
    }

    #[test]
    fn written_result() {
        let mut os = OutputStream::new();
        os.write_empty_encaps().unwrap();
        let mut incoming = Incoming::new(current(), InputStream::new(os.as_slice()));
        incoming.read_empty_params().unwrap();
        incoming.write_result(|os| {
            os.write_int(3);
            Ok(())
        }).unwrap();
        let result = incoming.take_result().unwrap();
        let mut is = InputStream::new(&result);
        is.start_read_encaps().unwrap();
        assert_eq!(3, is.read_int().unwrap());
        is.end_read_encaps().unwrap();
    }
}
