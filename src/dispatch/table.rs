use std::fmt;

use crate::dispatch::Incoming;
use crate::rpc::OperationDescriptor;
use crate::{Result, Status};

/// Operation name to thunk mapping for one interface. Entries are sorted by
/// name once at construction and looked up with binary search.
///
/// A thunk unmarshals parameters, calls the servant and marshals the result.
pub struct OperationTable<S: ?Sized + 'static> {
    entries: Vec<(&'static OperationDescriptor, fn(&S, &mut Incoming) -> Result<()>)>,
}

impl<S: ?Sized + 'static> OperationTable<S> {
    pub fn with() -> OperationTableBuilder<S> {
        OperationTableBuilder::new()
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(d, _)| d.name)
    }

    pub fn find(&self, operation: &str) -> Option<&'static OperationDescriptor> {
        self.position(operation).map(|i| self.entries[i].0)
    }

    fn position(&self, operation: &str) -> Option<usize> {
        self.entries.binary_search_by(|(d, _)| d.name.cmp(operation)).ok()
    }

    /// Runs the thunk registered for the current operation. A miss or a mode
    /// mismatch returns before any servant code runs.
    pub fn dispatch(&self, servant: &S, incoming: &mut Incoming) -> Result<()> {
        let (descriptor, thunk) = match self.position(&incoming.current().operation) {
            Some(i) => self.entries[i],
            None => return Err(Status::OperationNotExist(incoming.current().operation.clone())),
        };
        check_mode(descriptor, incoming)?;
        incoming.bind(descriptor);
        thunk(servant, incoming)
    }
}

impl<S: ?Sized + 'static> fmt::Debug for OperationTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

pub(crate) fn check_mode(descriptor: &OperationDescriptor, incoming: &Incoming) -> Result<()> {
    let received = incoming.current().mode;
    if descriptor.mode.accepts(received) {
        Ok(())
    } else {
        Err(Status::ModeViolation {
            operation: descriptor.name.to_string(),
            expected: descriptor.mode,
            received,
        })
    }
}

pub struct OperationTableBuilder<S: ?Sized + 'static> {
    entries: Vec<(&'static OperationDescriptor, fn(&S, &mut Incoming) -> Result<()>)>,
}

impl<S: ?Sized + 'static> OperationTableBuilder<S> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn operation(&mut self, descriptor: &'static OperationDescriptor,
                     thunk: fn(&S, &mut Incoming) -> Result<()>) -> &mut Self {
        self.entries.push((descriptor, thunk));
        self
    }

    /// Fails with `DuplicateDefinition` if two operations share a name.
    pub fn build(&mut self) -> Result<OperationTable<S>> {
        let mut entries = std::mem::take(&mut self.entries);
        entries.sort_by(|a, b| a.0.name.cmp(b.0.name));
        for pair in entries.windows(2) {
            if pair[0].0.name == pair[1].0.name {
                return Err(Status::DuplicateDefinition(format!("operation {} declared twice", pair[0].0.name)));
            }
        }
        Ok(OperationTable { entries })
    }
}

impl<S: ?Sized + 'static> Default for OperationTableBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::dispatch::Current;
    use crate::rpc::{Context, Identity, OperationMode, Shape};
    use crate::stream::{InputStream, OutputStream};

    const IFACE: &str = "::formats::IFormatReader";
    static CLOSE: OperationDescriptor = OperationDescriptor::new("close", OperationMode::Normal, IFACE);
    static GET_FORMAT: OperationDescriptor =
        OperationDescriptor::new("getFormat", OperationMode::Idempotent, IFACE).returns(Shape::String);
    static IS_THIS_TYPE: OperationDescriptor =
        OperationDescriptor::new("isThisType", OperationMode::Nonmutating, IFACE)
            .params(&[Shape::String])
            .returns(Shape::Bool);
    static SET_ID: OperationDescriptor =
        OperationDescriptor::new("setId", OperationMode::Normal, IFACE).params(&[Shape::String]);
    static SET_COMPRESSION: OperationDescriptor =
        OperationDescriptor::new("setCompression", OperationMode::Normal, IFACE).params(&[Shape::String]);

    #[derive(Default)]
    struct Counters {
        close: AtomicUsize,
        get_format: AtomicUsize,
        other: AtomicUsize,
    }

    fn close(s: &Counters, incoming: &mut Incoming) -> Result<()> {
        incoming.read_empty_params()?;
        s.close.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get_format(s: &Counters, incoming: &mut Incoming) -> Result<()> {
        incoming.read_empty_params()?;
        s.get_format.fetch_add(1, Ordering::SeqCst);
        incoming.write_result(|os| os.write_string("TIFF"))
    }

    fn other(s: &Counters, _incoming: &mut Incoming) -> Result<()> {
        s.other.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reader_table() -> OperationTable<Counters> {
        // registration order is not sorted on purpose
        OperationTable::with()
            .operation(&SET_ID, other)
            .operation(&GET_FORMAT, get_format)
            .operation(&CLOSE, close)
            .operation(&SET_COMPRESSION, other)
            .operation(&IS_THIS_TYPE, other)
            .build()
            .unwrap()
    }

    fn incoming(operation: &str, mode: OperationMode) -> Incoming {
        let mut os = OutputStream::new();
        os.write_empty_encaps().unwrap();
        let current = Current {
            request_id: 1,
            identity: Identity::new("reader"),
            facet: String::new(),
            operation: operation.to_string(),
            mode,
            context: Context::new(),
        };
        Incoming::new(current, InputStream::new(os.as_slice()))
    }

    #[test]
    fn sanity() {
        let table = reader_table();
        assert_eq!(5, table.len());
        assert_eq!(vec!["close", "getFormat", "isThisType", "setCompression", "setId"],
                   table.names().collect::<Vec<_>>());

        let servant = Counters::default();
        let mut inc = incoming("getFormat", OperationMode::Idempotent);
        table.dispatch(&servant, &mut inc).unwrap();
        assert_eq!(1, servant.get_format.load(Ordering::SeqCst));
        assert_eq!(0, servant.close.load(Ordering::SeqCst));
        assert_eq!(0, servant.other.load(Ordering::SeqCst));

        let result = inc.take_result().unwrap();
        let mut is = InputStream::new(&result);
        is.start_read_encaps().unwrap();
        assert_eq!("TIFF", is.read_string().unwrap());
    }

    #[test]
    fn unknown_operation_touches_nothing() {
        let table = reader_table();
        let servant = Counters::default();
        for name in ["open", "", "getformat", "close ", "zzz"] {
            let mut inc = incoming(name, OperationMode::Normal);
            assert!(matches!(table.dispatch(&servant, &mut inc), Err(Status::OperationNotExist(_))));
        }
        assert_eq!(0, servant.close.load(Ordering::SeqCst)
            + servant.get_format.load(Ordering::SeqCst)
            + servant.other.load(Ordering::SeqCst));
    }

    #[test]
    fn every_operation_reaches_one_thunk() {
        let table = reader_table();
        for name in table.names() {
            assert_eq!(name, table.find(name).unwrap().name);
        }
        let servant = Counters::default();
        let mut inc = incoming("close", OperationMode::Normal);
        table.dispatch(&servant, &mut inc).unwrap();
        assert_eq!(1, servant.close.load(Ordering::SeqCst));
        assert_eq!(0, servant.get_format.load(Ordering::SeqCst));
    }

    #[test]
    fn mode_violation() {
        let table = reader_table();
        let servant = Counters::default();

        let mut inc = incoming("close", OperationMode::Idempotent);
        match table.dispatch(&servant, &mut inc) {
            Err(Status::ModeViolation { operation, expected, received }) => {
                assert_eq!("close", operation);
                assert_eq!(OperationMode::Normal, expected);
                assert_eq!(OperationMode::Idempotent, received);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(0, servant.close.load(Ordering::SeqCst));

        // a read-only caller may use an idempotent operation
        let mut inc = incoming("getFormat", OperationMode::Nonmutating);
        assert!(table.dispatch(&servant, &mut inc).is_ok());
    }

    #[test]
    fn duplicate_names_rejected() {
        let rs = OperationTable::<Counters>::with()
            .operation(&CLOSE, close)
            .operation(&GET_FORMAT, get_format)
            .operation(&CLOSE, other)
            .build();
        assert!(matches!(rs, Err(Status::DuplicateDefinition(_))));
    }
}
