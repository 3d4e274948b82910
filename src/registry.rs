//! Native type-registration database walked by the reflector.
//!
//! Engine code registers classes, global methods/properties and event buses through the typed
//! builders here. Every callable is erased into an [`Invoker`] operating on [`BehaviorArgument`]
//! slots, which is the only shape the dispatcher knows how to call.

use bitflags::bitflags;
use glam::{Quat, Vec3};
use std::alloc::{self, Layout};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use uuid::Uuid;

use crate::marshal::{EntityId, Transform};

pub mod type_ids {
    use uuid::Uuid;

    pub const VOID: Uuid = Uuid::from_u128(0x61FD015A97704D7A9469DB614DDEFBD4);
    pub const BOOL: Uuid = Uuid::from_u128(0xBAABDE1295294707BD630009EBDCB06D);
    pub const INT8: Uuid = Uuid::from_u128(0xAE1EDAD6A5384073B551B8F69305AFBD);
    pub const INT16: Uuid = Uuid::from_u128(0xC0D12F51EE4F4CAF93951EFA1247700A);
    pub const INT32: Uuid = Uuid::from_u128(0x5C05C3A80DF04E719E59374D4F42B01B);
    pub const INT64: Uuid = Uuid::from_u128(0x2F441F9FDF144660A90B4E06A61E25DC);
    pub const UINT8: Uuid = Uuid::from_u128(0x322034CF87314D20AB3C894FF0D0E290);
    pub const UINT16: Uuid = Uuid::from_u128(0xB49D03C777724F03BAC1FC128B82847F);
    pub const UINT32: Uuid = Uuid::from_u128(0xA4108A6AFFC343B4AC41C895075F91B4);
    pub const UINT64: Uuid = Uuid::from_u128(0x430B373036D4411D9B8EB2EC7FE40F74);
    pub const FLOAT: Uuid = Uuid::from_u128(0xF1058F7EA82846F9B4328692E44A0666);
    pub const DOUBLE: Uuid = Uuid::from_u128(0x19A593577DC5436CB39B385BC2F251F3);
    pub const STRING: Uuid = Uuid::from_u128(0x3BAEE268B71949BC84D0A04973850D5A);
    pub const VECTOR3: Uuid = Uuid::from_u128(0x731F29004111420FB203D40B8A6A7ACF);
    pub const QUATERNION: Uuid = Uuid::from_u128(0xAEF9E892BA49493BA9FCAD9AC9E4B47C);
    pub const TRANSFORM: Uuid = Uuid::from_u128(0xDAA63316373A47D6A8F1907D63B3911E);
    pub const ENTITY_ID: Uuid = Uuid::from_u128(0x9D0B93C4F2FA4D90A6F7B00247726F57);
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ParamTraits: u32 {
        const POINTER = 1 << 0;
        const REFERENCE = 1 << 1;
        const CONST = 1 << 2;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ExcludeFlags: u32 {
        const LIST = 1 << 0;
        const DOCUMENTATION = 1 << 1;
        const PREVIEW = 1 << 2;
        const ALL = Self::LIST.bits() | Self::DOCUMENTATION.bits() | Self::PREVIEW.bits();
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ScopeFlags: u32 {
        const LAUNCHER = 1 << 0;
        const AUTOMATION = 1 << 1;
        const TOOLS = 1 << 2;
        const COMMON = Self::LAUNCHER.bits() | Self::AUTOMATION.bits();
    }
}

/// Closed set of metadata attached to registered items.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Category(String),
    Deprecated(bool),
    Description(String),
    DeprecationMessage(String),
    ExcludeFrom(ExcludeFlags),
    Scope(ScopeFlags),
    Module(String),
    Other { key: String, value: String },
}

impl Attribute {
    pub fn category(category: impl Into<String>) -> Self {
        Attribute::Category(category.into())
    }

    pub fn description(text: impl Into<String>) -> Self {
        Attribute::Description(text.into())
    }

    pub fn deprecated(message: impl Into<String>) -> [Self; 2] {
        [Attribute::Deprecated(true), Attribute::DeprecationMessage(message.into())]
    }
}

/// Types with a stable identity in the registry.
pub trait NativeType: 'static {
    const TYPE_ID: Uuid;
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeParameter {
    pub name: Option<String>,
    pub type_id: Uuid,
    pub traits: ParamTraits,
}

impl NativeParameter {
    pub fn new(type_id: Uuid) -> Self {
        Self { name: None, type_id, traits: ParamTraits::empty() }
    }

    pub fn pointer(type_id: Uuid) -> Self {
        Self { name: None, type_id, traits: ParamTraits::POINTER }
    }

    pub fn of<T: ArgumentType>() -> Self {
        T::parameter()
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// One addressable call slot: a typed pointer plus the identity of what it points at.
#[derive(Debug, Clone, Copy)]
pub struct BehaviorArgument {
    pub value: *mut (),
    pub type_id: Uuid,
    pub traits: ParamTraits,
}

impl BehaviorArgument {
    pub fn new(value: *mut (), type_id: Uuid, traits: ParamTraits) -> Self {
        Self { value, type_id, traits }
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// # Safety
    /// `value` must point at a live `T` whenever `type_id == T::TYPE_ID`.
    pub unsafe fn read<T: NativeType + Clone>(&self) -> Option<T> {
        if self.type_id != T::TYPE_ID || self.value.is_null() {
            return None;
        }
        Some((*(self.value as *const T)).clone())
    }

    /// # Safety
    /// `value` must point at an initialized `T` whenever `type_id == T::TYPE_ID`.
    pub unsafe fn write<T: NativeType>(&mut self, value: T) -> bool {
        if self.type_id != T::TYPE_ID || self.value.is_null() {
            return false;
        }
        *(self.value as *mut T) = value;
        true
    }
}

pub trait ArgumentType: Sized {
    fn parameter() -> NativeParameter;

    /// # Safety
    /// The argument's pointer must be valid for the type it claims.
    unsafe fn from_argument(arg: &BehaviorArgument) -> Option<Self>;
}

pub trait ResultType: Sized {
    fn result() -> Option<NativeParameter>;

    /// # Safety
    /// A provided slot must point at initialized storage of the type it claims.
    unsafe fn into_result(self, slot: Option<&mut BehaviorArgument>) -> bool;
}

macro_rules! value_type {
    ($ty:ty, $id:expr) => {
        impl NativeType for $ty {
            const TYPE_ID: Uuid = $id;
        }

        impl ArgumentType for $ty {
            fn parameter() -> NativeParameter {
                NativeParameter::new(<$ty as NativeType>::TYPE_ID)
            }

            unsafe fn from_argument(arg: &BehaviorArgument) -> Option<Self> {
                arg.read::<$ty>()
            }
        }

        impl ResultType for $ty {
            fn result() -> Option<NativeParameter> {
                Some(NativeParameter::new(<$ty as NativeType>::TYPE_ID))
            }

            unsafe fn into_result(self, slot: Option<&mut BehaviorArgument>) -> bool {
                match slot {
                    Some(slot) => slot.write(self),
                    None => true,
                }
            }
        }
    };
}

value_type!(bool, type_ids::BOOL);
value_type!(i8, type_ids::INT8);
value_type!(i16, type_ids::INT16);
value_type!(i32, type_ids::INT32);
value_type!(i64, type_ids::INT64);
value_type!(u8, type_ids::UINT8);
value_type!(u16, type_ids::UINT16);
value_type!(u32, type_ids::UINT32);
value_type!(u64, type_ids::UINT64);
value_type!(f32, type_ids::FLOAT);
value_type!(f64, type_ids::DOUBLE);
value_type!(String, type_ids::STRING);
value_type!(Vec3, type_ids::VECTOR3);
value_type!(Quat, type_ids::QUATERNION);
value_type!(Transform, type_ids::TRANSFORM);
value_type!(EntityId, type_ids::ENTITY_ID);

impl NativeType for () {
    const TYPE_ID: Uuid = type_ids::VOID;
}

impl ResultType for () {
    fn result() -> Option<NativeParameter> {
        None
    }

    unsafe fn into_result(self, _slot: Option<&mut BehaviorArgument>) -> bool {
        true
    }
}

/// Class instance passed by address.
pub struct ObjectPtr<T> {
    ptr: *mut T,
}

impl<T> Clone for ObjectPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ObjectPtr<T> {}

impl<T> fmt::Debug for ObjectPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectPtr").field(&self.ptr).finish()
    }
}

impl<T> ObjectPtr<T> {
    pub fn new(ptr: *mut T) -> Self {
        Self { ptr }
    }

    pub fn from_box(value: Box<T>) -> Self {
        Self { ptr: Box::into_raw(value) }
    }

    pub fn as_ptr(self) -> *mut T {
        self.ptr
    }

    pub fn is_null(self) -> bool {
        self.ptr.is_null()
    }

    /// # Safety
    /// The pointer must reference a live `T` for the returned lifetime.
    pub unsafe fn as_mut<'a>(self) -> Option<&'a mut T> {
        self.ptr.as_mut()
    }
}

impl<T: NativeType> ArgumentType for ObjectPtr<T> {
    fn parameter() -> NativeParameter {
        NativeParameter::pointer(T::TYPE_ID)
    }

    unsafe fn from_argument(arg: &BehaviorArgument) -> Option<Self> {
        if arg.type_id != T::TYPE_ID || arg.value.is_null() {
            return None;
        }
        Some(Self::new(arg.value as *mut T))
    }
}

impl<T: NativeType> ResultType for ObjectPtr<T> {
    fn result() -> Option<NativeParameter> {
        Some(NativeParameter::pointer(T::TYPE_ID))
    }

    unsafe fn into_result(self, slot: Option<&mut BehaviorArgument>) -> bool {
        match slot {
            Some(slot) => write_object_slot(slot, T::TYPE_ID, self.ptr as *mut ()),
            None => true,
        }
    }
}

/// Object result slots hold a `*mut ()` that receives the instance address.
unsafe fn write_object_slot(slot: &mut BehaviorArgument, type_id: Uuid, object: *mut ()) -> bool {
    if slot.type_id != type_id || slot.value.is_null() {
        return false;
    }
    *(slot.value as *mut *mut ()) = object;
    true
}

pub type Invoker = Arc<dyn Fn(&[BehaviorArgument], Option<&mut BehaviorArgument>) -> bool + Send + Sync>;

pub struct CallableParts {
    pub args: Vec<NativeParameter>,
    pub result: Option<NativeParameter>,
    pub invoker: Invoker,
}

pub trait IntoNativeFn<Args, R>: Send + Sync + 'static {
    fn into_parts(self) -> CallableParts;
}

pub trait IntoNativeMember<C, Args, R>: Send + Sync + 'static {
    fn into_parts(self) -> CallableParts;
}

pub trait IntoNativeConstructor<C, Args>: Send + Sync + 'static {
    fn into_parts(self) -> CallableParts;
}

macro_rules! impl_callables {
    ($($arg:ident),*) => {
        impl<F, R, $($arg,)*> IntoNativeFn<($($arg,)*), R> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: ResultType,
            $($arg: ArgumentType,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn into_parts(self) -> CallableParts {
                let invoker: Invoker = Arc::new(move |args: &[BehaviorArgument], result: Option<&mut BehaviorArgument>| {
                    let mut index = 0usize;
                    $(
                        let Some($arg) = args.get(index).and_then(|arg| unsafe { <$arg as ArgumentType>::from_argument(arg) }) else {
                            return false;
                        };
                        index += 1;
                    )*
                    let value = (self)($($arg),*);
                    unsafe { value.into_result(result) }
                });
                CallableParts { args: vec![$(<$arg as ArgumentType>::parameter()),*], result: R::result(), invoker }
            }
        }

        impl<F, C, R, $($arg,)*> IntoNativeMember<C, ($($arg,)*), R> for F
        where
            F: Fn(&mut C, $($arg),*) -> R + Send + Sync + 'static,
            C: NativeType,
            R: ResultType,
            $($arg: ArgumentType,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn into_parts(self) -> CallableParts {
                let invoker: Invoker = Arc::new(move |args: &[BehaviorArgument], result: Option<&mut BehaviorArgument>| {
                    let Some(receiver) = args.first() else {
                        return false;
                    };
                    if receiver.type_id != C::TYPE_ID || receiver.value.is_null() {
                        return false;
                    }
                    let mut index = 1usize;
                    $(
                        let Some($arg) = args.get(index).and_then(|arg| unsafe { <$arg as ArgumentType>::from_argument(arg) }) else {
                            return false;
                        };
                        index += 1;
                    )*
                    let this = unsafe { &mut *(receiver.value as *mut C) };
                    let value = (self)(this, $($arg),*);
                    unsafe { value.into_result(result) }
                });
                CallableParts {
                    args: vec![NativeParameter::pointer(C::TYPE_ID).named("this"), $(<$arg as ArgumentType>::parameter()),*],
                    result: R::result(),
                    invoker,
                }
            }
        }

        impl<F, C, $($arg,)*> IntoNativeConstructor<C, ($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> C + Send + Sync + 'static,
            C: NativeType,
            $($arg: ArgumentType,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn into_parts(self) -> CallableParts {
                let invoker: Invoker = Arc::new(move |args: &[BehaviorArgument], result: Option<&mut BehaviorArgument>| {
                    let Some(slot) = result else {
                        return false;
                    };
                    let mut index = 0usize;
                    $(
                        let Some($arg) = args.get(index).and_then(|arg| unsafe { <$arg as ArgumentType>::from_argument(arg) }) else {
                            return false;
                        };
                        index += 1;
                    )*
                    let object = Box::into_raw(Box::new((self)($($arg),*))) as *mut ();
                    if unsafe { write_object_slot(slot, C::TYPE_ID, object) } {
                        true
                    } else {
                        drop(unsafe { Box::from_raw(object as *mut C) });
                        false
                    }
                });
                CallableParts {
                    args: vec![$(<$arg as ArgumentType>::parameter()),*],
                    result: Some(NativeParameter::pointer(C::TYPE_ID)),
                    invoker,
                }
            }
        }
    };
}

impl_callables!();
impl_callables!(A1);
impl_callables!(A1, A2);
impl_callables!(A1, A2, A3);
impl_callables!(A1, A2, A3, A4);
impl_callables!(A1, A2, A3, A4, A5);

pub struct NativeMethod {
    pub name: String,
    pub args: Vec<NativeParameter>,
    pub result: Option<NativeParameter>,
    pub is_member: bool,
    pub is_const: bool,
    pub attributes: Vec<Attribute>,
    invoker: Invoker,
}

impl fmt::Debug for NativeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeMethod")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("result", &self.result)
            .field("is_member", &self.is_member)
            .field("is_const", &self.is_const)
            .finish_non_exhaustive()
    }
}

impl NativeMethod {
    pub fn from_parts(name: impl Into<String>, parts: CallableParts, is_member: bool) -> Self {
        Self {
            name: name.into(),
            args: parts.args,
            result: parts.result,
            is_member,
            is_const: false,
            attributes: Vec::new(),
            invoker: parts.invoker,
        }
    }

    pub fn function<Args, R>(name: impl Into<String>, f: impl IntoNativeFn<Args, R>) -> Self {
        Self::from_parts(name, f.into_parts(), false)
    }

    pub fn member<C, Args, R>(name: impl Into<String>, f: impl IntoNativeMember<C, Args, R>) -> Self {
        Self::from_parts(name, f.into_parts(), true)
    }

    pub fn constructor<C, Args>(name: impl Into<String>, f: impl IntoNativeConstructor<C, Args>) -> Self {
        Self::from_parts(name, f.into_parts(), false)
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_attributes(mut self, attributes: impl IntoIterator<Item = Attribute>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn constant(mut self) -> Self {
        self.is_const = true;
        self
    }

    /// Names the explicit arguments in order; the receiver of a member method keeps its name.
    pub fn arg_names<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        let skip = usize::from(self.is_member);
        for (param, name) in self.args.iter_mut().skip(skip).zip(names) {
            param.name = Some(name.to_string());
        }
        self
    }

    /// # Safety
    /// Every argument and the result slot must point at live storage of the types they claim.
    pub unsafe fn call(&self, args: &[BehaviorArgument], result: Option<&mut BehaviorArgument>) -> bool {
        if args.len() != self.args.len() {
            return false;
        }
        (self.invoker)(args, result)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NativeProperty {
    pub name: String,
    pub getter: Option<Arc<NativeMethod>>,
    pub setter: Option<Arc<NativeMethod>>,
    pub attributes: Vec<Attribute>,
}

impl NativeProperty {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn with_getter(mut self, getter: NativeMethod) -> Self {
        self.getter = Some(Arc::new(getter));
        self
    }

    pub fn with_setter(mut self, setter: NativeMethod) -> Self {
        self.setter = Some(Arc::new(setter));
        self
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }
}

/// Allocation and lifetime hooks for a class. Classes without `Default` carry only the
/// teardown half, which frees instances their constructors produced.
#[derive(Clone, Copy)]
pub struct ClassBinding {
    allocate: fn() -> *mut (),
    default_construct: Option<unsafe fn(*mut ())>,
    destruct: unsafe fn(*mut ()),
    deallocate: unsafe fn(*mut ()),
}

impl fmt::Debug for ClassBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassBinding").finish_non_exhaustive()
    }
}

fn allocate_for<T>() -> *mut () {
    let layout = Layout::new::<T>();
    if layout.size() == 0 {
        return NonNull::<T>::dangling().as_ptr() as *mut ();
    }
    unsafe { alloc::alloc(layout) as *mut () }
}

unsafe fn default_construct_for<T: Default>(object: *mut ()) {
    ptr::write(object as *mut T, T::default());
}

unsafe fn destruct_for<T>(object: *mut ()) {
    ptr::drop_in_place(object as *mut T);
}

unsafe fn deallocate_for<T>(object: *mut ()) {
    let layout = Layout::new::<T>();
    if layout.size() != 0 {
        alloc::dealloc(object as *mut u8, layout);
    }
}

impl ClassBinding {
    pub fn of<T: Default + 'static>() -> Self {
        Self { default_construct: Some(default_construct_for::<T>), ..Self::teardown::<T>() }
    }

    /// Destroy-only binding for classes built through constructors.
    pub fn teardown<T: 'static>() -> Self {
        Self {
            allocate: allocate_for::<T>,
            default_construct: None,
            destruct: destruct_for::<T>,
            deallocate: deallocate_for::<T>,
        }
    }

    pub fn has_default(&self) -> bool {
        self.default_construct.is_some()
    }

    /// Allocates and default-constructs one instance. Returns null when allocation fails or
    /// the class has no default constructor.
    pub fn create_default(&self) -> *mut () {
        let Some(construct) = self.default_construct else {
            return ptr::null_mut();
        };
        let object = (self.allocate)();
        if object.is_null() {
            return object;
        }
        unsafe { construct(object) };
        object
    }

    /// # Safety
    /// `object` must come from [`ClassBinding::create_default`] or a constructor of the same class,
    /// and must not be used afterwards.
    pub unsafe fn destroy(&self, object: *mut ()) {
        (self.destruct)(object);
        (self.deallocate)(object);
    }
}

#[derive(Debug, Clone)]
pub struct NativeClass {
    pub name: String,
    pub type_id: Uuid,
    pub bases: Vec<Uuid>,
    pub methods: Vec<Arc<NativeMethod>>,
    pub properties: Vec<NativeProperty>,
    pub constructors: Vec<Arc<NativeMethod>>,
    pub attributes: Vec<Attribute>,
    pub binding: Option<Arc<ClassBinding>>,
}

impl NativeClass {
    pub fn new(name: impl Into<String>, type_id: Uuid) -> Self {
        Self {
            name: name.into(),
            type_id,
            bases: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            constructors: Vec::new(),
            attributes: Vec::new(),
            binding: None,
        }
    }
}

/// Signature of one way to raise an event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventSender {
    pub args: Vec<NativeParameter>,
    pub result: Option<NativeParameter>,
}

#[derive(Debug, Clone)]
pub struct NativeEBusEvent {
    pub name: String,
    pub broadcast: Option<EventSender>,
    pub event: Option<EventSender>,
}

#[derive(Debug, Clone)]
pub struct NativeEBus {
    pub name: String,
    pub type_id: Uuid,
    pub address: Option<NativeParameter>,
    pub events: Vec<NativeEBusEvent>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Default)]
pub struct NativeRegistry {
    classes: BTreeMap<String, NativeClass>,
    ebuses: BTreeMap<String, NativeEBus>,
    methods: Vec<Arc<NativeMethod>>,
    properties: Vec<NativeProperty>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classes(&self) -> impl Iterator<Item = &NativeClass> {
        self.classes.values()
    }

    pub fn class(&self, name: &str) -> Option<&NativeClass> {
        self.classes.get(name)
    }

    pub fn class_by_type_id(&self, type_id: Uuid) -> Option<&NativeClass> {
        self.classes.values().find(|class| class.type_id == type_id)
    }

    pub fn ebuses(&self) -> impl Iterator<Item = &NativeEBus> {
        self.ebuses.values()
    }

    pub fn methods(&self) -> &[Arc<NativeMethod>] {
        &self.methods
    }

    pub fn properties(&self) -> &[NativeProperty] {
        &self.properties
    }

    pub fn add_class(&mut self, class: NativeClass) -> &mut NativeClass {
        match self.classes.entry(class.name.clone()) {
            Entry::Occupied(mut slot) => {
                log::warn!("[registry] class '{}' registered twice; keeping the latest", class.name);
                slot.insert(class);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(class),
        }
    }

    pub fn class_builder<T: NativeType>(&mut self, name: impl Into<String>) -> ClassBuilder<'_, T> {
        let class = self.add_class(NativeClass::new(name, T::TYPE_ID));
        ClassBuilder { class, _marker: PhantomData }
    }

    pub fn add_method(&mut self, method: NativeMethod) -> &mut Self {
        if let Some(pos) = self.methods.iter().position(|existing| existing.name == method.name) {
            log::warn!("[registry] global method '{}' registered twice; keeping the latest", method.name);
            self.methods[pos] = Arc::new(method);
        } else {
            self.methods.push(Arc::new(method));
        }
        self
    }

    pub fn method<Args, R>(&mut self, name: impl Into<String>, f: impl IntoNativeFn<Args, R>) -> &mut Self {
        self.add_method(NativeMethod::function(name, f))
    }

    pub fn add_property(&mut self, property: NativeProperty) -> &mut Self {
        if let Some(pos) = self.properties.iter().position(|existing| existing.name == property.name) {
            log::warn!("[registry] global property '{}' registered twice; keeping the latest", property.name);
            self.properties[pos] = property;
        } else {
            self.properties.push(property);
        }
        self
    }

    pub fn property<V, G, S>(&mut self, name: impl Into<String>, getter: G, setter: S) -> &mut Self
    where
        G: IntoNativeFn<(), V>,
        S: IntoNativeFn<(V,), ()>,
    {
        let name = name.into();
        let property = NativeProperty::new(name.clone())
            .with_getter(NativeMethod::function(format!("Get{name}"), getter))
            .with_setter(NativeMethod::function(format!("Set{name}"), setter));
        self.add_property(property)
    }

    pub fn read_only_property<V>(&mut self, name: impl Into<String>, getter: impl IntoNativeFn<(), V>) -> &mut Self {
        let name = name.into();
        let property = NativeProperty::new(name.clone()).with_getter(NativeMethod::function(format!("Get{name}"), getter));
        self.add_property(property)
    }

    pub fn ebus(&mut self, name: impl Into<String>, type_id: Uuid) -> EBusBuilder<'_> {
        let name = name.into();
        let bus = NativeEBus { name: name.clone(), type_id, address: None, events: Vec::new(), attributes: Vec::new() };
        let bus = match self.ebuses.entry(name) {
            Entry::Occupied(mut slot) => {
                log::warn!("[registry] ebus '{}' registered twice; keeping the latest", bus.name);
                slot.insert(bus);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(bus),
        };
        EBusBuilder { bus }
    }
}

pub struct ClassBuilder<'a, T> {
    class: &'a mut NativeClass,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: NativeType> ClassBuilder<'a, T> {
    pub fn attribute(self, attribute: Attribute) -> Self {
        self.class.attributes.push(attribute);
        self
    }

    pub fn attributes(self, attributes: impl IntoIterator<Item = Attribute>) -> Self {
        self.class.attributes.extend(attributes);
        self
    }

    pub fn base<B: NativeType>(self) -> Self {
        self.class.bases.push(B::TYPE_ID);
        self
    }

    pub fn add_method(self, method: NativeMethod) -> Self {
        self.class.methods.push(Arc::new(method));
        self
    }

    pub fn method<Args, R>(self, name: impl Into<String>, f: impl IntoNativeMember<T, Args, R>) -> Self {
        self.add_method(NativeMethod::member(name, f))
    }

    pub fn static_method<Args, R>(self, name: impl Into<String>, f: impl IntoNativeFn<Args, R>) -> Self {
        self.add_method(NativeMethod::function(name, f))
    }

    pub fn constructor<Args>(self, f: impl IntoNativeConstructor<T, Args>) -> Self {
        let index = self.class.constructors.len();
        let ctor = NativeMethod::constructor(format!("{}_ctor{index}", self.class.name), f);
        self.class.constructors.push(Arc::new(ctor));
        if self.class.binding.is_none() {
            self.class.binding = Some(Arc::new(ClassBinding::teardown::<T>()));
        }
        self
    }

    pub fn add_property(self, property: NativeProperty) -> Self {
        self.class.properties.push(property);
        self
    }

    pub fn property<V, G, S>(self, name: impl Into<String>, getter: G, setter: S) -> Self
    where
        G: IntoNativeMember<T, (), V>,
        S: IntoNativeMember<T, (V,), ()>,
    {
        let name = name.into();
        let property = NativeProperty::new(name.clone())
            .with_getter(NativeMethod::member(format!("Get{name}"), getter).constant())
            .with_setter(NativeMethod::member(format!("Set{name}"), setter));
        self.add_property(property)
    }

    pub fn read_only_property<V>(self, name: impl Into<String>, getter: impl IntoNativeMember<T, (), V>) -> Self {
        let name = name.into();
        let getter = NativeMethod::member(format!("Get{name}"), getter).constant();
        self.add_property(NativeProperty::new(name).with_getter(getter))
    }

    pub fn write_only_property<V>(self, name: impl Into<String>, setter: impl IntoNativeMember<T, (V,), ()>) -> Self {
        let name = name.into();
        let setter = NativeMethod::member(format!("Set{name}"), setter);
        self.add_property(NativeProperty::new(name).with_setter(setter))
    }

    pub fn finish(self) -> &'a mut NativeClass {
        self.class
    }
}

impl<'a, T: NativeType + Default> ClassBuilder<'a, T> {
    pub fn default_binding(self) -> Self {
        self.class.binding = Some(Arc::new(ClassBinding::of::<T>()));
        self
    }
}

pub struct EBusBuilder<'a> {
    bus: &'a mut NativeEBus,
}

impl<'a> EBusBuilder<'a> {
    pub fn attribute(self, attribute: Attribute) -> Self {
        self.bus.attributes.push(attribute);
        self
    }

    pub fn address<A: ArgumentType>(self) -> Self {
        self.bus.address = Some(A::parameter().named("address"));
        self
    }

    pub fn broadcast_event(
        self,
        name: impl Into<String>,
        args: Vec<NativeParameter>,
        result: Option<NativeParameter>,
    ) -> Self {
        let sender = EventSender { args, result };
        self.bus.events.push(NativeEBusEvent { name: name.into(), broadcast: Some(sender), event: None });
        self
    }

    /// Addressed event; the bus address becomes the sender's first argument.
    pub fn event(self, name: impl Into<String>, args: Vec<NativeParameter>, result: Option<NativeParameter>) -> Self {
        let mut sender_args = Vec::with_capacity(args.len() + 1);
        if let Some(address) = &self.bus.address {
            sender_args.push(address.clone());
        }
        sender_args.extend(args);
        let sender = EventSender { args: sender_args, result };
        self.bus.events.push(NativeEBusEvent { name: name.into(), broadcast: None, event: Some(sender) });
        self
    }

    pub fn finish(self) -> &'a mut NativeEBus {
        self.bus
    }
}
