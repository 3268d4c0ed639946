//! Self-contained in-memory runtime.
//!
//! [`LocalRuntime`] keeps classes, objects and constant-pool tables in
//! plain vectors and maps. It backs the command-line runner and the test
//! suites; objects are never freed.

use std::collections::HashMap;
use std::sync::Arc;

use abcvm_isa::BytecodeId;

use crate::method::{Field, Method};
use crate::runtime::{ExceptionKind, RuntimeInterface};
use crate::thread::ManagedThread;
use crate::value::{ClassRef, ObjectRef, VRegister};

#[derive(Debug, Clone)]
struct ClassInfo {
    name: String,
    super_class: Option<ClassRef>,
    /// Element class of a reference array.
    component: Option<ClassRef>,
    is_array: bool,
}

#[derive(Debug, Clone)]
enum HeapObject {
    Instance {
        class: ClassRef,
        fields: HashMap<u32, VRegister>,
    },
    Array {
        class: ClassRef,
        elements: Vec<VRegister>,
    },
    Str {
        class: ClassRef,
        value: String,
    },
}

impl HeapObject {
    fn class(&self) -> ClassRef {
        match self {
            Self::Instance { class, .. } | Self::Array { class, .. } | Self::Str { class, .. } => *class,
        }
    }
}

/// Class name of the exception object raised for `kind`.
pub fn exception_class_name(kind: &ExceptionKind) -> &'static str {
    match kind {
        ExceptionKind::NullPointer => "NullPointerException",
        ExceptionKind::ArrayIndexOutOfBounds { .. } => "ArrayIndexOutOfBoundsException",
        ExceptionKind::NegativeArraySize(_) => "NegativeArraySizeException",
        ExceptionKind::ArrayStore { .. } => "ArrayStoreException",
        ExceptionKind::Arithmetic => "ArithmeticException",
        ExceptionKind::ClassCast { .. } => "ClassCastException",
        ExceptionKind::StackOverflow => "StackOverflowError",
        ExceptionKind::AbstractMethod => "AbstractMethodError",
        ExceptionKind::Unresolved(_) => "NoClassDefFoundError",
        ExceptionKind::OutOfMemory => "OutOfMemoryError",
    }
}

/// Default managed heap size, in value slots.
pub const DEFAULT_HEAP_LIMIT: usize = 1 << 24;

const EXCEPTION_CLASSES: [&str; 10] = [
    "NullPointerException",
    "ArrayIndexOutOfBoundsException",
    "NegativeArraySizeException",
    "ArrayStoreException",
    "ArithmeticException",
    "ClassCastException",
    "StackOverflowError",
    "AbstractMethodError",
    "NoClassDefFoundError",
    "OutOfMemoryError",
];

/// In-memory [`RuntimeInterface`] implementation.
///
/// Ids used by instructions are looked up in per-kind tables filled with
/// the `register_*` methods; an id nobody registered fails to resolve.
#[derive(Debug)]
pub struct LocalRuntime {
    classes: Vec<ClassInfo>,
    class_names: HashMap<String, ClassRef>,
    objects: Vec<HeapObject>,
    class_objects: HashMap<ClassRef, ObjectRef>,
    class_ids: HashMap<u32, ClassRef>,
    method_ids: HashMap<u32, Arc<Method>>,
    field_ids: HashMap<u32, Arc<Field>>,
    string_ids: HashMap<u32, ObjectRef>,
    /// `(class, overridden method id)` to implementation.
    overrides: HashMap<(ClassRef, u32), Arc<Method>>,
    statics: HashMap<u32, VRegister>,
    object_class: ClassRef,
    string_class: ClassRef,
    class_class: ClassRef,
    throwable_class: ClassRef,
    thrown: Vec<ExceptionKind>,
    /// Value slots held by live objects: one per instance, one plus the
    /// length per array.
    heap_used: usize,
    heap_limit: usize,
}

impl Default for LocalRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRuntime {
    /// Runtime with the root classes and one class per built-in exception.
    pub fn new() -> Self {
        let mut rt = Self {
            classes: Vec::new(),
            class_names: HashMap::new(),
            objects: Vec::new(),
            class_objects: HashMap::new(),
            class_ids: HashMap::new(),
            method_ids: HashMap::new(),
            field_ids: HashMap::new(),
            string_ids: HashMap::new(),
            overrides: HashMap::new(),
            statics: HashMap::new(),
            object_class: ClassRef(0),
            string_class: ClassRef(0),
            class_class: ClassRef(0),
            throwable_class: ClassRef(0),
            thrown: Vec::new(),
            heap_used: 0,
            heap_limit: DEFAULT_HEAP_LIMIT,
        };
        rt.object_class = rt.push_class("Object", None, None, false);
        rt.string_class = rt.define_class("String", None);
        rt.class_class = rt.define_class("Class", None);
        rt.throwable_class = rt.define_class("Throwable", None);
        let throwable = rt.throwable_class;
        for name in EXCEPTION_CLASSES {
            rt.define_class(name, Some(throwable));
        }
        rt
    }

    /// Cap managed allocations (`newobj`, `newarr`, `initobj`) at `slots`
    /// value slots; past it they raise `OutOfMemoryError`.
    pub fn with_heap_limit(mut self, slots: usize) -> Self {
        self.heap_limit = slots;
        self
    }

    pub fn heap_used(&self) -> usize {
        self.heap_used
    }

    fn push_class(
        &mut self,
        name: &str,
        super_class: Option<ClassRef>,
        component: Option<ClassRef>,
        is_array: bool,
    ) -> ClassRef {
        let class = ClassRef(self.classes.len() as u32);
        self.classes.push(ClassInfo {
            name: name.to_string(),
            super_class,
            component,
            is_array,
        });
        self.class_names.insert(name.to_string(), class);
        class
    }

    /// Define a class. `None` for the superclass means `Object`.
    pub fn define_class(&mut self, name: &str, super_class: Option<ClassRef>) -> ClassRef {
        let super_class = super_class.unwrap_or(self.object_class);
        self.push_class(name, Some(super_class), None, false)
    }

    /// Define an array class. `component` is the element class of a
    /// reference array, `None` for a primitive array.
    pub fn define_array_class(&mut self, name: &str, component: Option<ClassRef>) -> ClassRef {
        let object = self.object_class;
        self.push_class(name, Some(object), component, true)
    }

    pub fn class_by_name(&self, name: &str) -> Option<ClassRef> {
        self.class_names.get(name).copied()
    }

    pub fn class_name(&self, class: ClassRef) -> &str {
        self.classes.get(class.0 as usize).map_or("<unknown>", |c| c.name.as_str())
    }

    pub fn object_class(&self) -> ClassRef {
        self.object_class
    }

    pub fn string_class(&self) -> ClassRef {
        self.string_class
    }

    pub fn throwable_class(&self) -> ClassRef {
        self.throwable_class
    }

    /// Class of the exception object raised for `kind`.
    pub fn exception_class(&self, kind: &ExceptionKind) -> ClassRef {
        self.class_by_name(exception_class_name(kind))
            .unwrap_or(self.throwable_class)
    }

    pub fn register_class(&mut self, id: u32, class: ClassRef) {
        self.class_ids.insert(id, class);
    }

    pub fn register_method(&mut self, id: u32, method: Arc<Method>) {
        self.method_ids.insert(id, method);
    }

    pub fn register_field(&mut self, id: u32, field: Arc<Field>) {
        self.field_ids.insert(id, field);
    }

    /// Intern `value` as the string constant `id`.
    pub fn register_string(&mut self, id: u32, value: &str) -> ObjectRef {
        let obj = self.alloc(HeapObject::Str {
            class: self.string_class,
            value: value.to_string(),
        });
        self.string_ids.insert(id, obj);
        obj
    }

    /// Make `implementation` the target of `base` for receivers of `class`
    /// and its subclasses.
    pub fn set_override(&mut self, class: ClassRef, base: &Method, implementation: Arc<Method>) {
        self.overrides.insert((class, base.id()), implementation);
    }

    fn alloc(&mut self, obj: HeapObject) -> ObjectRef {
        self.heap_used += match &obj {
            HeapObject::Array { elements, .. } => 1 + elements.len(),
            _ => 1,
        };
        let handle = ObjectRef::from_index(self.objects.len());
        self.objects.push(obj);
        handle
    }

    /// Whether `slots` more value slots stay within the heap limit.
    fn fits(&self, slots: usize) -> bool {
        self.heap_used
            .checked_add(slots)
            .is_some_and(|total| total <= self.heap_limit)
    }

    fn zeroed_elements(&self, array_class: ClassRef, length: usize) -> Option<Vec<VRegister>> {
        let zero = if self.component_type(array_class).is_some() {
            VRegister::null()
        } else {
            VRegister::default()
        };
        let mut elements = Vec::new();
        elements.try_reserve_exact(length).ok()?;
        elements.resize(length, zero);
        Some(elements)
    }

    /// Host-side allocation of an instance, outside the heap limit.
    pub fn new_object(&mut self, class: ClassRef) -> ObjectRef {
        self.alloc(HeapObject::Instance {
            class,
            fields: HashMap::new(),
        })
    }

    /// Host-side allocation of an array, outside the heap limit. An array
    /// the allocator cannot provide comes back empty.
    pub fn new_array(&mut self, array_class: ClassRef, length: u32) -> ObjectRef {
        let elements = self
            .zeroed_elements(array_class, length as usize)
            .unwrap_or_default();
        self.alloc(HeapObject::Array {
            class: array_class,
            elements,
        })
    }

    fn object(&self, obj: ObjectRef) -> Option<&HeapObject> {
        self.objects.get(obj.index())
    }

    pub fn string_value(&self, obj: ObjectRef) -> Option<&str> {
        match self.object(obj)? {
            HeapObject::Str { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn array_elements(&self, obj: ObjectRef) -> Option<&[VRegister]> {
        match self.object(obj)? {
            HeapObject::Array { elements, .. } => Some(elements),
            _ => None,
        }
    }

    /// Every exception raised through [`RuntimeInterface::throw`], oldest
    /// first.
    pub fn thrown(&self) -> &[ExceptionKind] {
        &self.thrown
    }

    pub fn last_thrown(&self) -> Option<&ExceptionKind> {
        self.thrown.last()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn super_of(&self, class: ClassRef) -> Option<ClassRef> {
        self.classes.get(class.0 as usize)?.super_class
    }
}

impl RuntimeInterface for LocalRuntime {
    fn resolve_method(&mut self, _caller: &Method, id: BytecodeId) -> Option<Arc<Method>> {
        self.method_ids.get(&id.raw()).cloned()
    }

    fn resolve_field(&mut self, _caller: &Method, id: BytecodeId) -> Option<Arc<Field>> {
        self.field_ids.get(&id.raw()).cloned()
    }

    fn resolve_class(&mut self, _caller: &Method, id: BytecodeId) -> Option<ClassRef> {
        self.class_ids.get(&id.raw()).copied()
    }

    fn resolve_string(&mut self, _caller: &Method, id: BytecodeId) -> Option<ObjectRef> {
        self.string_ids.get(&id.raw()).copied()
    }

    fn resolve_virtual(&mut self, receiver: ObjectRef, method: &Arc<Method>) -> Option<Arc<Method>> {
        let mut class = Some(self.class_of(receiver));
        while let Some(c) = class {
            if let Some(target) = self.overrides.get(&(c, method.id())) {
                return Some(Arc::clone(target));
            }
            class = self.super_of(c);
        }
        let callable = method.code().is_some() || method.native().is_some();
        callable.then(|| Arc::clone(method))
    }

    fn class_object(&mut self, class: ClassRef) -> ObjectRef {
        if let Some(&obj) = self.class_objects.get(&class) {
            return obj;
        }
        let obj = self.alloc(HeapObject::Instance {
            class: self.class_class,
            fields: HashMap::new(),
        });
        self.class_objects.insert(class, obj);
        obj
    }

    fn create_object(&mut self, thread: &mut ManagedThread, class: ClassRef) -> Option<ObjectRef> {
        if !self.fits(1) {
            self.throw_out_of_memory_error(thread);
            return None;
        }
        Some(self.new_object(class))
    }

    fn create_array(
        &mut self,
        thread: &mut ManagedThread,
        array_class: ClassRef,
        length: u32,
    ) -> Option<ObjectRef> {
        let elements = if self.fits(1 + length as usize) {
            self.zeroed_elements(array_class, length as usize)
        } else {
            None
        };
        let Some(elements) = elements else {
            log::warn!("heap exhausted: {length} elements requested, {} slots in use", self.heap_used);
            self.throw_out_of_memory_error(thread);
            return None;
        };
        Some(self.alloc(HeapObject::Array {
            class: array_class,
            elements,
        }))
    }

    fn class_of(&self, obj: ObjectRef) -> ClassRef {
        self.object(obj).map_or(self.object_class, HeapObject::class)
    }

    fn is_assignable(&self, from: ClassRef, to: ClassRef) -> bool {
        if from == to || to == self.object_class {
            return true;
        }
        let (Some(src), Some(dst)) = (self.classes.get(from.0 as usize), self.classes.get(to.0 as usize)) else {
            return false;
        };
        if src.is_array && dst.is_array {
            return match (src.component, dst.component) {
                (Some(a), Some(b)) => self.is_assignable(a, b),
                _ => false,
            };
        }
        let mut class = src.super_class;
        while let Some(c) = class {
            if c == to {
                return true;
            }
            class = self.super_of(c);
        }
        false
    }

    fn component_type(&self, array_class: ClassRef) -> Option<ClassRef> {
        self.classes.get(array_class.0 as usize)?.component
    }

    fn array_length(&self, array: ObjectRef) -> u32 {
        self.array_elements(array).map_or(0, |e| e.len() as u32)
    }

    fn array_get(&self, array: ObjectRef, index: u32) -> VRegister {
        self.array_elements(array)
            .and_then(|e| e.get(index as usize).copied())
            .unwrap_or_default()
    }

    fn array_set(&mut self, array: ObjectRef, index: u32, value: VRegister) {
        if let Some(HeapObject::Array { elements, .. }) = self.objects.get_mut(array.index())
            && let Some(slot) = elements.get_mut(index as usize)
        {
            *slot = value;
        }
    }

    fn field_get(&self, obj: Option<ObjectRef>, field: &Field) -> VRegister {
        match obj {
            None => self.statics.get(&field.id).copied().unwrap_or_default(),
            Some(obj) => match self.object(obj) {
                Some(HeapObject::Instance { fields, .. }) => fields.get(&field.slot).copied().unwrap_or_default(),
                _ => VRegister::default(),
            },
        }
    }

    fn field_set(&mut self, obj: Option<ObjectRef>, field: &Field, value: VRegister) {
        match obj {
            None => {
                self.statics.insert(field.id, value);
            }
            Some(obj) => {
                if let Some(HeapObject::Instance { fields, .. }) = self.objects.get_mut(obj.index()) {
                    fields.insert(field.slot, value);
                } else {
                    log::warn!("store to {} of a non-instance object", field.name);
                }
            }
        }
    }

    fn throw(&mut self, thread: &mut ManagedThread, kind: ExceptionKind) {
        let class = self.exception_class(&kind);
        let exception = self.new_object(class);
        log::debug!("throw {kind}");
        self.thrown.push(kind);
        thread.set_exception(exception);
    }
}
