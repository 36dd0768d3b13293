use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;

use crate::rpc::ROOT_TYPE_ID;
use crate::stream::{InputStream, OutputStream};
use crate::{Corrupting, Result, Status};

pub type ObjectPtr = Arc<RwLock<dyn Object>>;

/// A value that travels by reference inside object graphs.
///
/// `write_slices` emits one slice per level of the type hierarchy, most
/// derived first, and always finishes with the root slice.
/// `read_slices` consumes them in the same order.
pub trait Object: Any + Send + Sync {
    fn most_derived_id(&self) -> &str;

    fn is_a(&self, type_id: &str) -> bool;

    fn write_slices(&self, os: &mut OutputStream) -> Result<()>;

    fn read_slices(&mut self, is: &mut InputStream) -> Result<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub fn new_object<T: Object>(obj: T) -> ObjectPtr {
    Arc::new(RwLock::new(obj))
}

pub fn lock_read(obj: &ObjectPtr) -> Result<RwLockReadGuard<'_, dyn Object>> {
    obj.read().map_err(|_| Status::UnknownLocalException("object lock poisoned".into()))
}

pub fn lock_write(obj: &ObjectPtr) -> Result<RwLockWriteGuard<'_, dyn Object>> {
    obj.write().map_err(|_| Status::UnknownLocalException("object lock poisoned".into()))
}

/// Borrows the concrete value behind `obj`.
pub fn with_object<T: Object, R>(obj: &ObjectPtr, f: impl FnOnce(&T) -> R) -> Result<R> {
    let guard = lock_read(obj)?;
    match guard.as_any().downcast_ref::<T>() {
        Some(v) => Ok(f(v)),
        None => Err(Status::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
            actual: guard.most_derived_id().to_string(),
        }),
    }
}

pub fn with_object_mut<T: Object, R>(obj: &ObjectPtr, f: impl FnOnce(&mut T) -> R) -> Result<R> {
    let mut guard = lock_write(obj)?;
    let actual = guard.most_derived_id().to_string();
    match guard.as_any_mut().downcast_mut::<T>() {
        Some(v) => Ok(f(v)),
        None => Err(Status::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
            actual,
        }),
    }
}

/// Identity comparison: same allocation, regardless of vtable.
pub fn same_object(a: &ObjectPtr, b: &ObjectPtr) -> bool {
    address_of(a) == address_of(b)
}

fn address_of(obj: &ObjectPtr) -> usize {
    Arc::as_ptr(obj) as *const () as usize
}

/// A reference field. Decoding fills the slot only once the whole message
/// has been read, so a field may be empty while its owner is being decoded.
pub struct ObjectRef {
    slot: Arc<Mutex<Option<ObjectPtr>>>,
}

impl ObjectRef {
    pub fn new(target: Option<ObjectPtr>) -> Self {
        Self { slot: Arc::new(Mutex::new(target)) }
    }

    pub fn null() -> Self {
        Self::new(None)
    }

    pub fn to(target: &ObjectPtr) -> Self {
        Self::new(Some(target.clone()))
    }

    pub fn get(&self) -> Option<ObjectPtr> {
        match self.slot.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, target: Option<ObjectPtr>) {
        match self.slot.lock() {
            Ok(mut guard) => *guard = target,
            Err(poisoned) => *poisoned.into_inner() = target,
        }
    }

    pub fn is_null(&self) -> bool { self.get().is_none() }

    fn share_slot(&self) -> Arc<Mutex<Option<ObjectPtr>>> { self.slot.clone() }
}

impl Default for ObjectRef {
    fn default() -> Self {
        Self::null()
    }
}

/// Cloning copies the current target into a fresh slot.
impl Clone for ObjectRef {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(obj) => write!(f, "ObjectRef({:#x})", address_of(&obj)),
            None => write!(f, "ObjectRef(null)"),
        }
    }
}

/// Deferred resolution of one decoded reference. Runs exactly once, after the
/// message that carried it has been fully decoded.
pub struct Patcher {
    expected: Option<String>,
    apply: Box<dyn FnOnce(Option<ObjectPtr>) -> Result<()> + Send>,
}

impl Patcher {
    pub fn new<F>(expected: Option<&str>, apply: F) -> Self
        where F: FnOnce(Option<ObjectPtr>) -> Result<()> + Send + 'static {
        Self {
            expected: expected.map(str::to_string),
            apply: Box::new(apply),
        }
    }

    pub fn expected(&self) -> Option<&str> { self.expected.as_deref() }

    fn check(&self, target: &Option<ObjectPtr>) -> Result<()> {
        if let (Some(expected), Some(obj)) = (&self.expected, target) {
            let guard = lock_read(obj)?;
            if !guard.is_a(expected) {
                return Err(Status::TypeMismatch {
                    expected: expected.clone(),
                    actual: guard.most_derived_id().to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct WriteObjects {
    indices: HashMap<usize, i32>,
    // keeps every written object alive so addresses stay unique for the stream's lifetime
    retained: Vec<ObjectPtr>,
    pending: VecDeque<(i32, ObjectPtr)>,
    next_index: i32,
    type_ids: HashMap<String, usize>,
}

impl WriteObjects {
    fn index_of(&self, obj: &ObjectPtr) -> Option<i32> {
        self.indices.get(&address_of(obj)).copied()
    }

    fn register(&mut self, obj: &ObjectPtr) -> i32 {
        self.next_index += 1;
        self.indices.insert(address_of(obj), self.next_index);
        self.retained.push(obj.clone());
        self.next_index
    }
}

#[derive(Default)]
pub(super) struct ReadObjects {
    instances: HashMap<i32, ObjectPtr>,
    patchers: Vec<(i32, Patcher)>,
    type_ids: Vec<String>,
    // type id consumed while looking for a factory, owed to the next start_slice
    current_type_id: Option<String>,
}

impl ReadObjects {
    pub(super) fn has_unresolved(&self) -> bool { !self.patchers.is_empty() }
}

/*
 * reference marker (i32):
 *   0    null
 *  -n    new instance n, encoding follows inline
 *  +n    instance n, already seen or queued in the pending section
 *
 * instance: slice* root-slice
 * slice:    type-id size(i32, includes itself) body
 * type-id:  bool(false) string | bool(true) size(index into ids seen so far)
 */
impl OutputStream {
    pub fn write_type_id(&mut self, type_id: &str) -> Result<()> {
        match self.objects.type_ids.get(type_id) {
            Some(index) => {
                let index = *index;
                self.write_bool(true);
                self.write_size(index)
            }
            None => {
                let index = self.objects.type_ids.len();
                self.objects.type_ids.insert(type_id.to_string(), index);
                self.write_bool(false);
                self.write_string(type_id)
            }
        }
    }

    pub fn start_slice(&mut self, type_id: &str) -> Result<()> {
        self.write_type_id(type_id)?;
        let pos = self.reserve_i32();
        self.slices.push(pos);
        Ok(())
    }

    pub fn end_slice(&mut self) -> Result<()> {
        match self.slices.pop() {
            Some(pos) => self.patch_size_from(pos),
            None => Err(Status::corrupted("end_slice without start_slice")),
        }
    }

    pub fn write_root_slice(&mut self) -> Result<()> {
        self.start_slice(ROOT_TYPE_ID)?;
        self.end_slice()
    }

    /// Outside of any slice the first occurrence is encoded inline. Inside a
    /// slice only the index is written and the instance goes to the pending
    /// section, so a reader that skips the slice never loses an instance.
    pub fn write_object(&mut self, v: Option<&ObjectPtr>) -> Result<()> {
        let obj = match v {
            Some(obj) => obj,
            None => {
                self.write_int(0);
                return Ok(());
            }
        };
        if let Some(index) = self.objects.index_of(obj) {
            self.write_int(index);
            return Ok(());
        }
        let index = self.objects.register(obj);
        if !self.slices.is_empty() {
            self.objects.pending.push_back((index, obj.clone()));
            self.write_int(index);
            return Ok(());
        }
        self.write_int(-index);
        self.write_instance(obj)
    }

    pub fn write_ref(&mut self, v: &ObjectRef) -> Result<()> {
        self.write_object(v.get().as_ref())
    }

    /// Writes only the index; the instance is emitted by `write_pending_objects`.
    pub fn write_object_deferred(&mut self, v: Option<&ObjectPtr>) -> Result<()> {
        let obj = match v {
            Some(obj) => obj,
            None => {
                self.write_int(0);
                return Ok(());
            }
        };
        if let Some(index) = self.objects.index_of(obj) {
            self.write_int(index);
            return Ok(());
        }
        let index = self.objects.register(obj);
        self.objects.pending.push_back((index, obj.clone()));
        self.write_int(index);
        Ok(())
    }

    /// Flushes queued instances in batches until writing them queues no more,
    /// then terminates the section with a zero count.
    pub fn write_pending_objects(&mut self) -> Result<()> {
        loop {
            let batch: Vec<(i32, ObjectPtr)> = self.objects.pending.drain(..).collect();
            self.write_size(batch.len())?;
            if batch.is_empty() {
                return Ok(());
            }
            for (index, obj) in batch {
                self.write_int(index);
                self.write_instance(&obj)?;
            }
        }
    }

    fn write_instance(&mut self, obj: &ObjectPtr) -> Result<()> {
        let guard = lock_read(obj)?;
        let depth = self.slices.len();
        guard.write_slices(self)?;
        if self.slices.len() != depth {
            return Err(Status::corrupted(format!("{} left a slice open", guard.most_derived_id())));
        }
        Ok(())
    }
}

impl InputStream {
    pub fn read_type_id(&mut self) -> Result<String> {
        if self.read_bool()? {
            let index = self.read_size()?;
            match self.objects.type_ids.get(index) {
                Some(type_id) => Ok(type_id.clone()),
                None => Err(Status::corrupted(format!("type id index {} out of range", index))),
            }
        } else {
            let type_id = self.read_string()?;
            self.objects.type_ids.push(type_id.clone());
            Ok(type_id)
        }
    }

    pub fn start_slice(&mut self, expected: &str) -> Result<()> {
        let type_id = match self.objects.current_type_id.take() {
            Some(type_id) => type_id,
            None => self.read_type_id()?,
        };
        if type_id != expected {
            return Err(Status::corrupted(format!("expected slice {}, found {}", expected, type_id)));
        }
        self.start_slice_body()
    }

    fn start_slice_body(&mut self) -> Result<()> {
        let start = self.read_pos();
        let size = self.read_int()?;
        if size < 4 {
            return Err(Status::corrupted(format!("slice size {} too small", size)));
        }
        let body = size as usize - 4;
        if body > self.remaining() {
            return Err(Status::truncated(body, self.remaining()));
        }
        self.slices.push(start + size as usize);
        Ok(())
    }

    /// Skips fields this reader does not know about.
    pub fn end_slice(&mut self) -> Result<()> {
        let end = match self.slices.pop() {
            Some(end) => end,
            None => return Err(Status::corrupted("end_slice without start_slice")),
        };
        if self.read_pos() > end {
            return Err(Status::corrupted(format!("slice overrun by {} bytes", self.read_pos() - end)));
        }
        self.skip_to(end)
    }

    pub fn read_root_slice(&mut self) -> Result<()> {
        self.start_slice(ROOT_TYPE_ID)?;
        self.end_slice()
    }

    /// Hands an already consumed type id to the next `start_slice`.
    pub(super) fn resume_slice(&mut self, type_id: String) {
        self.objects.current_type_id = Some(type_id);
    }

    pub(super) fn skip_slice(&mut self) -> Result<Bytes> {
        self.start_slice_body()?;
        let len = match self.slices.last() {
            Some(end) => *end - self.read_pos(),
            None => 0,
        };
        let data = self.read_blob(len)?;
        self.end_slice()?;
        Ok(data)
    }

    /// Reads a reference marker, decoding an inline instance if one follows.
    /// Inside a slice only indices are accepted, which bounds nesting to one
    /// instance. The patcher runs in `read_pending_objects`.
    pub fn read_object(&mut self, patcher: Patcher) -> Result<()> {
        let marker = self.read_int()?;
        if marker == i32::MIN {
            return Err(Status::corrupted("invalid object marker"));
        }
        if marker < 0 {
            if !self.slices.is_empty() {
                return Err(Status::corrupted(format!("inline instance {} inside a slice", -marker)));
            }
            self.read_instance(-marker)?;
        }
        self.objects.patchers.push((marker.abs(), patcher));
        Ok(())
    }

    pub fn read_ref(&mut self, expected: Option<&str>) -> Result<ObjectRef> {
        let field = ObjectRef::null();
        let slot = field.share_slot();
        self.read_object(Patcher::new(expected, move |target| {
            match slot.lock() {
                Ok(mut guard) => *guard = target,
                Err(poisoned) => *poisoned.into_inner() = target,
            }
            Ok(())
        }))?;
        Ok(field)
    }

    fn read_instance(&mut self, index: i32) -> Result<()> {
        if self.objects.instances.contains_key(&index) {
            return Err(Status::corrupted(format!("instance {} decoded twice", index)));
        }
        let mut skipped: Vec<(String, Bytes)> = Vec::new();
        let obj = loop {
            let type_id = self.read_type_id()?;
            if type_id == ROOT_TYPE_ID {
                let most_derived = match skipped.first() {
                    Some((id, _)) => id.clone(),
                    None => type_id.clone(),
                };
                self.objects.current_type_id = Some(type_id);
                break new_object(UnknownObject { type_id: most_derived, slices: skipped });
            }
            let factory = self.factories.as_ref().and_then(|f| f.find(&type_id));
            if let Some(factory) = factory {
                self.objects.current_type_id = Some(type_id);
                break factory();
            }
            let data = self.skip_slice()?;
            skipped.push((type_id, data));
        };
        self.objects.instances.insert(index, obj.clone());

        let rs = match lock_write(&obj) {
            Ok(mut guard) => guard.read_slices(self),
            Err(e) => Err(e),
        };
        if self.objects.current_type_id.take().is_some() {
            rs?;
            return Err(Status::corrupted("object did not read its own slice"));
        }
        rs
    }

    /// Reads the pending-object section and then resolves every queued
    /// reference. Nothing is patched unless every target exists and has the
    /// expected type.
    pub fn read_pending_objects(&mut self) -> Result<()> {
        loop {
            // index + type id flag + slice size
            let n = self.read_and_check_seq_size(9)?;
            if n == 0 {
                break;
            }
            for _ in 0..n {
                let index = self.read_int()?;
                if index <= 0 {
                    return Err(Status::corrupted(format!("invalid pending instance index {}", index)));
                }
                self.read_instance(index)?;
            }
        }
        self.drain_patchers()
    }

    fn drain_patchers(&mut self) -> Result<()> {
        let patchers = std::mem::take(&mut self.objects.patchers);
        let mut resolved = Vec::with_capacity(patchers.len());
        for (index, patcher) in patchers {
            let target = if index == 0 {
                None
            } else {
                match self.objects.instances.get(&index) {
                    Some(obj) => Some(obj.clone()),
                    None => return Err(Status::corrupted(format!("no instance for index {}", index))),
                }
            };
            patcher.check(&target)?;
            resolved.push((patcher, target));
        }
        for (patcher, target) in resolved {
            (patcher.apply)(target)?;
        }
        Ok(())
    }
}

/// Stand-in for an instance whose type ids are all unknown to this reader.
/// Keeps the raw bytes of every skipped slice; slices that themselves held
/// references are not meaningful once moved to another stream.
#[derive(Debug, Clone)]
pub struct UnknownObject {
    type_id: String,
    slices: Vec<(String, Bytes)>,
}

impl UnknownObject {
    pub fn new(type_id: &str) -> Self {
        Self { type_id: type_id.to_string(), slices: Vec::new() }
    }

    pub fn type_id(&self) -> &str { &self.type_id }

    pub fn slices(&self) -> &[(String, Bytes)] { &self.slices }
}

impl Object for UnknownObject {
    fn most_derived_id(&self) -> &str { &self.type_id }

    fn is_a(&self, type_id: &str) -> bool {
        type_id == ROOT_TYPE_ID || type_id == self.type_id
            || self.slices.iter().any(|(id, _)| id == type_id)
    }

    fn write_slices(&self, os: &mut OutputStream) -> Result<()> {
        for (type_id, data) in &self.slices {
            os.start_slice(type_id)?;
            os.write_blob(data);
            os.end_slice()?;
        }
        os.write_root_slice()
    }

    fn read_slices(&mut self, is: &mut InputStream) -> Result<()> {
        is.read_root_slice()
    }

    fn as_any(&self) -> &dyn Any { self }

    fn as_any_mut(&mut self) -> &mut dyn Any { self }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::rpc::TypeIds;
    use crate::stream::FactoryRegistry;

    const BASE: &str = "::demo::Base";
    const DERIVED: &str = "::demo::Derived";
    const BASE_IDS: TypeIds = TypeIds::new(&["::Object", "::demo::Base"], 1);
    const DERIVED_IDS: TypeIds = TypeIds::new(&["::Object", "::demo::Base", "::demo::Derived"], 2);

    #[derive(Default)]
    struct Base {
        name: String,
        next: ObjectRef,
    }

    impl Base {
        fn write_base(&self, os: &mut OutputStream) -> Result<()> {
            os.start_slice(BASE)?;
            os.write_string(&self.name)?;
            os.write_ref(&self.next)?;
            os.end_slice()?;
            os.write_root_slice()
        }

        fn read_base(&mut self, is: &mut InputStream) -> Result<()> {
            is.start_slice(BASE)?;
            self.name = is.read_string()?;
            self.next = is.read_ref(Some(BASE))?;
            is.end_slice()?;
            is.read_root_slice()
        }
    }

    impl Object for Base {
        fn most_derived_id(&self) -> &str { BASE_IDS.most_derived() }
        fn is_a(&self, type_id: &str) -> bool { BASE_IDS.is_a(type_id) }
        fn write_slices(&self, os: &mut OutputStream) -> Result<()> { self.write_base(os) }
        fn read_slices(&mut self, is: &mut InputStream) -> Result<()> { self.read_base(is) }
        fn as_any(&self) -> &dyn Any { self }
        fn as_any_mut(&mut self) -> &mut dyn Any { self }
    }

    #[derive(Default)]
    struct Derived {
        base: Base,
        weight: i32,
    }

    impl Object for Derived {
        fn most_derived_id(&self) -> &str { DERIVED_IDS.most_derived() }
        fn is_a(&self, type_id: &str) -> bool { DERIVED_IDS.is_a(type_id) }

        fn write_slices(&self, os: &mut OutputStream) -> Result<()> {
            os.start_slice(DERIVED)?;
            os.write_int(self.weight);
            os.end_slice()?;
            self.base.write_base(os)
        }

        fn read_slices(&mut self, is: &mut InputStream) -> Result<()> {
            is.start_slice(DERIVED)?;
            self.weight = is.read_int()?;
            is.end_slice()?;
            self.base.read_base(is)
        }

        fn as_any(&self) -> &dyn Any { self }
        fn as_any_mut(&mut self) -> &mut dyn Any { self }
    }

    fn registry(with_derived: bool) -> Arc<FactoryRegistry> {
        let registry = FactoryRegistry::new();
        registry.add(BASE, || new_object(Base::default())).unwrap();
        if with_derived {
            registry.add(DERIVED, || new_object(Derived::default())).unwrap();
        }
        Arc::new(registry)
    }

    fn next_of(obj: &ObjectPtr) -> Option<ObjectPtr> {
        let guard = obj.read().unwrap();
        if let Some(base) = guard.as_any().downcast_ref::<Base>() {
            return base.next.get();
        }
        guard.as_any().downcast_ref::<Derived>().and_then(|d| d.base.next.get())
    }

    #[test]
    fn cycle_between_base_and_derived() {
        let a = new_object(Base { name: "a".into(), next: ObjectRef::null() });
        let b = new_object(Derived {
            base: Base { name: "b".into(), next: ObjectRef::to(&a) },
            weight: 7,
        });
        with_object::<Base, _>(&a, |base| base.next.set(Some(b.clone()))).unwrap();

        let mut os = OutputStream::new();
        os.write_object(Some(&a)).unwrap();
        os.write_pending_objects().unwrap();

        let mut is = InputStream::with_factories(os.as_slice(), registry(true), 1024);
        let root = is.read_ref(Some(BASE)).unwrap();
        is.read_pending_objects().unwrap();
        assert!(is.is_exhausted());

        let a2 = root.get().unwrap();
        let b2 = next_of(&a2).unwrap();
        assert!(!same_object(&a2, &b2));
        assert!(same_object(&next_of(&b2).unwrap(), &a2));

        assert_eq!("a", with_object::<Base, _>(&a2, |x| x.name.clone()).unwrap());
        assert_eq!(7, with_object::<Derived, _>(&b2, |x| x.weight).unwrap());
        assert!(b2.read().unwrap().is_a(BASE));
        assert!(!a2.read().unwrap().is_a(DERIVED));
    }

    #[test]
    fn shared_references_keep_identity() {
        let shared = new_object(Base { name: "s".into(), next: ObjectRef::null() });
        let mut os = OutputStream::new();
        os.write_object(Some(&shared)).unwrap();
        os.write_object(Some(&shared)).unwrap();
        os.write_object(None).unwrap();
        os.write_pending_objects().unwrap();

        let mut is = InputStream::with_factories(os.as_slice(), registry(false), 1024);
        let first = is.read_ref(None).unwrap();
        let second = is.read_ref(None).unwrap();
        let third = is.read_ref(None).unwrap();
        is.read_pending_objects().unwrap();
        assert!(same_object(&first.get().unwrap(), &second.get().unwrap()));
        assert!(third.is_null());
    }

    #[test]
    fn patchers_run_exactly_once_after_decode() {
        let a = new_object(Base { name: "a".into(), next: ObjectRef::null() });
        let b = new_object(Base { name: "b".into(), next: ObjectRef::to(&a) });
        with_object::<Base, _>(&a, |x| x.next.set(Some(b.clone()))).unwrap();

        let mut os = OutputStream::new();
        os.write_object_deferred(Some(&a)).unwrap();
        os.write_object_deferred(Some(&b)).unwrap();
        os.write_pending_objects().unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let mut is = InputStream::with_factories(os.as_slice(), registry(false), 1024);
        for _ in 0..2 {
            let calls = calls.clone();
            is.read_object(Patcher::new(Some(BASE), move |target| {
                assert!(target.is_some());
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })).unwrap();
        }
        assert_eq!(0, calls.load(Ordering::SeqCst));
        is.read_pending_objects().unwrap();
        assert_eq!(2, calls.load(Ordering::SeqCst));
        // drained: a second pass has nothing left to run
        assert!(!is.objects.has_unresolved());
    }

    #[test]
    fn unknown_derived_type_slices_to_base() {
        let b = new_object(Derived {
            base: Base { name: "b".into(), next: ObjectRef::null() },
            weight: 3,
        });
        let mut os = OutputStream::new();
        os.write_object(Some(&b)).unwrap();
        os.write_pending_objects().unwrap();

        // older reader: knows Base only
        let mut is = InputStream::with_factories(os.as_slice(), registry(false), 1024);
        let r = is.read_ref(Some(BASE)).unwrap();
        is.read_pending_objects().unwrap();
        let obj = r.get().unwrap();
        assert_eq!(BASE, obj.read().unwrap().most_derived_id());
        assert_eq!("b", with_object::<Base, _>(&obj, |x| x.name.clone()).unwrap());
    }

    #[test]
    fn no_factory_builds_unknown_object() {
        let b = new_object(Derived {
            base: Base { name: "b".into(), next: ObjectRef::null() },
            weight: 3,
        });
        let mut os = OutputStream::new();
        os.write_object(Some(&b)).unwrap();
        os.write_pending_objects().unwrap();

        let mut is = InputStream::new(os.as_slice());
        let r = is.read_ref(None).unwrap();
        is.read_pending_objects().unwrap();
        let obj = r.get().unwrap();
        let guard = obj.read().unwrap();
        assert_eq!(DERIVED, guard.most_derived_id());
        assert!(guard.is_a(BASE));
        let unknown = guard.as_any().downcast_ref::<UnknownObject>().unwrap();
        assert_eq!(2, unknown.slices().len());
        assert_eq!(DERIVED, unknown.slices()[0].0);
    }

    #[test]
    fn newer_writer_appends_fields() {
        let mut os = OutputStream::new();
        os.write_int(-1);
        os.start_slice(BASE).unwrap();
        os.write_string("v2").unwrap();
        os.write_int(0);
        os.write_double(3.25); // field unknown to this reader
        os.end_slice().unwrap();
        os.write_root_slice().unwrap();
        os.write_pending_objects().unwrap();

        let mut is = InputStream::with_factories(os.as_slice(), registry(false), 1024);
        let r = is.read_ref(None).unwrap();
        is.read_pending_objects().unwrap();
        assert!(is.is_exhausted());
        assert_eq!("v2", with_object::<Base, _>(&r.get().unwrap(), |x| x.name.clone()).unwrap());
    }

    #[test]
    fn type_mismatch_on_patch() {
        let plain = new_object(UnknownObject::new("::demo::Other"));
        let mut os = OutputStream::new();
        os.write_object(Some(&plain)).unwrap();
        os.write_pending_objects().unwrap();

        let mut is = InputStream::new(os.as_slice());
        let r = is.read_ref(Some(BASE)).unwrap();
        assert!(matches!(is.read_pending_objects(), Err(Status::TypeMismatch { .. })));
        assert!(r.is_null());
    }

    #[test]
    fn dangling_reference_fails() {
        let mut os = OutputStream::new();
        os.write_int(5);
        os.write_size(0).unwrap();
        let mut is = InputStream::new(os.as_slice());
        let r = is.read_ref(None).unwrap();
        assert!(matches!(is.read_pending_objects(), Err(Status::Corruption(_))));
        assert!(r.is_null());
    }

    #[test]
    fn inline_instance_inside_slice_is_rejected() {
        // hand-built: the nested instance should have been deferred
        let mut os = OutputStream::new();
        os.write_int(-1);
        os.start_slice(BASE).unwrap();
        os.write_string("outer").unwrap();
        os.write_int(-2);
        os.start_slice(BASE).unwrap();
        os.write_string("inner").unwrap();
        os.write_int(0);
        os.end_slice().unwrap();
        os.write_root_slice().unwrap();
        os.end_slice().unwrap();
        os.write_root_slice().unwrap();
        os.write_size(0).unwrap();

        let mut is = InputStream::with_factories(os.as_slice(), registry(false), 1024);
        match is.read_ref(Some(BASE)) {
            Err(Status::Corruption(msg)) => assert!(msg.contains("inside a slice")),
            rs => panic!("expected corruption, got {:?}", rs.map(|r| r.is_null())),
        }
    }

    #[test]
    fn deeply_nested_input_fails_without_recursing() {
        let depth = 10_000;
        let mut os = OutputStream::new();
        os.write_int(-1);
        for i in 0..depth {
            os.start_slice(BASE).unwrap();
            os.write_string("n").unwrap();
            os.write_int(if i + 1 == depth { 0 } else { -(i + 2) });
        }
        for _ in 0..depth {
            os.end_slice().unwrap();
            os.write_root_slice().unwrap();
        }
        os.write_size(0).unwrap();

        let mut is = InputStream::with_factories(os.as_slice(), registry(false), 1024);
        assert!(matches!(is.read_ref(None), Err(Status::Corruption(_))));
    }

    #[test]
    fn type_ids_are_indexed_after_first_use() {
        let a = new_object(Base::default());
        let b = new_object(Base::default());
        let mut os = OutputStream::new();
        os.write_object(Some(&a)).unwrap();
        let first = os.len();
        os.write_object(Some(&b)).unwrap();
        let second = os.len() - first;
        // second instance refers to both type ids by index
        assert!(second < first);
    }
}
