//! Actions, action types, and typed action factories.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Erased action payload. Payloads live in memory only and are shared, not
/// copied, between the reducers registered for one type.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Tag identifying one kind of action.
///
/// Slice-registered types follow the `"[sliceName] localName"` convention;
/// the leading `[` is the qualification marker. Cheap to clone and compare.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ActionType(Arc<str>);

impl ActionType {
    /// Create a type tag from a raw string.
    pub fn new(tag: impl AsRef<str>) -> Self {
        ActionType(Arc::from(tag.as_ref()))
    }

    /// Whether this tag already carries a slice qualifier.
    pub fn is_qualified(&self) -> bool {
        self.0.starts_with('[')
    }

    /// Qualify a local type under a slice name, leaving already-qualified
    /// tags untouched so a slice can attach to a type owned elsewhere.
    pub fn qualify(slice: &str, local: &str) -> Self {
        if local.starts_with('[') {
            ActionType::new(local)
        } else {
            ActionType::new(format!("[{}] {}", slice, local))
        }
    }

    /// The raw tag string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionType({})", self.0)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A dispatched action: a type tag plus an erased payload.
#[derive(Clone)]
pub struct Action {
    ty: ActionType,
    payload: Payload,
}

impl Action {
    /// Build an action directly from a tag and payload.
    ///
    /// Prefer [`ActionFactory::of`], which keeps the payload type tied to
    /// the tag; this constructor exists for tests and interop glue.
    pub fn new<P: Send + Sync + 'static>(ty: ActionType, payload: P) -> Self {
        Action {
            ty,
            payload: Arc::new(payload),
        }
    }

    /// The action's type tag.
    pub fn ty(&self) -> &ActionType {
        &self.ty
    }

    /// The erased payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action({})", self.ty)
    }
}

/// Typed constructor for actions of one fixed type.
///
/// Returned by [`Slice::add_reducer`](crate::Slice::add_reducer). The payload
/// type travels with the factory, so a second slice attaching a reducer to
/// this type (via [`Slice::add_reducer_for`](crate::Slice::add_reducer_for))
/// agrees on the payload at compile time.
pub struct ActionFactory<P> {
    ty: ActionType,
    _payload: PhantomData<fn(P)>,
}

impl<P: Send + Sync + 'static> ActionFactory<P> {
    pub(crate) fn new(ty: ActionType) -> Self {
        ActionFactory {
            ty,
            _payload: PhantomData,
        }
    }

    /// Create an action of this factory's type.
    pub fn of(&self, payload: P) -> Action {
        Action {
            ty: self.ty.clone(),
            payload: Arc::new(payload),
        }
    }

    /// The type tag this factory produces.
    pub fn ty(&self) -> &ActionType {
        &self.ty
    }
}

impl<P> Clone for ActionFactory<P> {
    fn clone(&self) -> Self {
        ActionFactory {
            ty: self.ty.clone(),
            _payload: PhantomData,
        }
    }
}

impl<P> fmt::Debug for ActionFactory<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionFactory({})", self.ty)
    }
}
