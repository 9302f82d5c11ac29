use std::{
    any::{type_name, TypeId},
    fmt::Display,
    sync::OnceLock,
};

use birpc_context::Context;

use crate::{ClientConnector, MethodResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Value,
    /// Passed by reference, so the callee writes into caller-owned storage.
    Pointer,
}

/// Identity of one parameter or result in a method signature.
#[derive(Debug, Clone, Copy)]
pub struct TypeInfo {
    id: TypeId,
    name: &'static str,
    shape: Shape,
}

impl TypeInfo {
    pub fn value<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
            shape: Shape::Value,
        }
    }

    pub fn pointer<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
            shape: Shape::Pointer,
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Same underlying type, whatever the shape.
    pub fn is(&self, other: &TypeInfo) -> bool {
        self.id == other.id
    }
}

impl Display for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.shape {
            Shape::Value => write!(f, "{}", self.name),
            Shape::Pointer => write!(f, "&mut {}", self.name),
        }
    }
}

/// The three special parameter types of the calling convention.
#[derive(Debug)]
pub struct Capabilities {
    pub context: TypeInfo,
    pub client: TypeInfo,
    pub error: TypeInfo,
}

static CAPABILITIES: OnceLock<Capabilities> = OnceLock::new();

pub fn capabilities() -> &'static Capabilities {
    CAPABILITIES.get_or_init(|| Capabilities {
        context: TypeInfo::value::<Context>(),
        client: TypeInfo::value::<ClientConnector>(),
        error: TypeInfo::value::<MethodResult>(),
    })
}

fn strip_generics(full: &str) -> &str {
    match full.find('<') {
        Some(idx) => &full[..idx],
        None => full,
    }
}

fn is_anonymous(full: &str) -> bool {
    full.starts_with(|c: char| matches!(c, '(' | '[' | '&' | '*')) || full.starts_with("dyn ")
}

/// Declared name of a type from its full path: `my_app::math::Math<u32>` gives `Math`.
/// Anonymous types (tuples, references, closures) have no name.
pub fn short_name(full: &str) -> &str {
    if is_anonymous(full) {
        return "";
    }
    let base = strip_generics(full);
    let last = base.rsplit("::").next().unwrap_or(base);
    let is_ident = last.chars().all(|c| c.is_alphanumeric() || c == '_') && last.starts_with(|c: char| c.is_alphabetic() || c == '_');
    if is_ident {
        last
    } else {
        ""
    }
}

pub fn is_exported(name: &str) -> bool {
    name.chars().next().map_or(false, |c| c.is_uppercase())
}

const POINTERS: [&str; 4] = ["alloc::boxed::Box<", "alloc::sync::Arc<", "alloc::rc::Rc<", "core::option::Option<"];

/// Strips references and owning pointers: `&alloc::boxed::Box<app::Math>` gives `app::Math`.
fn pointee(mut full: &str) -> &str {
    loop {
        if let Some(rest) = full.strip_prefix("&mut ").or_else(|| full.strip_prefix('&')) {
            full = rest;
            continue;
        }
        match POINTERS.iter().find_map(|ptr| full.strip_prefix(ptr)) {
            Some(rest) => full = rest.strip_suffix('>').unwrap_or(rest),
            None => return full,
        }
    }
}

/// Types a foreign decoder can always see: primitives, tuples, slices and std types are builtin,
/// everything else must carry an uppercase name. Pointers are judged by what they point to.
pub fn is_exported_or_builtin(info: &TypeInfo) -> bool {
    let full = pointee(info.name());
    if is_anonymous(full) {
        return true;
    }
    match strip_generics(full).split_once("::") {
        None => true,
        Some((krate, _)) if matches!(krate, "core" | "alloc" | "std") => true,
        Some(_) => is_exported(short_name(full)),
    }
}
