//! Keys, type tokens and declared variance edges.
//!
//! Dispatch selects bindings by key. A key is normally a runtime type
//! ([`TypeToken`]), sometimes an opaque name (format tags), and rarely the
//! wildcard that matches everything. Variance is an explicit relation:
//! a [`Payload`] declares the wider keys it can stand in for, each paired
//! with a view function that converts a value to the wider representation.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Shared currency for payloads, dependencies and results.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Box a value into the shared [`Value`] currency.
pub fn value<T: Any + Send + Sync>(v: T) -> Value {
    Arc::new(v)
}

/// Recover a shared handle to a `T` from a [`Value`].
pub fn coerce<T: Any + Send + Sync>(v: &Value) -> Option<Arc<T>> {
    v.clone().downcast::<T>().ok()
}

/// Recover an owned clone of a `T` from a [`Value`].
pub fn coerce_cloned<T: Any + Send + Sync + Clone>(v: &Value) -> Option<T> {
    v.downcast_ref::<T>().cloned()
}

/// Identity of a runtime type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeToken {
    id: TypeId,
    name: &'static str,
}

impl TypeToken {
    /// The token for `T`.
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The unique runtime identity.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The diagnostic name of the type.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// A stable in-process integer derived from the identity, used where
    /// an address-like id is needed for a type with no live instance.
    pub fn id_hash(&self) -> usize {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.id.hash(&mut hasher);
        hasher.finish() as usize
    }
}

impl fmt::Debug for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeToken({})", self.name)
    }
}

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

type ViewFn = dyn Fn(&Value) -> Option<Value> + Send + Sync;

/// A declared widening edge: a wider key plus the view that converts a
/// value to the wider representation.
#[derive(Clone)]
pub struct Upcast {
    token: TypeToken,
    view: Arc<ViewFn>,
}

impl Upcast {
    /// The wider key this edge reaches.
    pub fn token(&self) -> TypeToken {
        self.token
    }

    /// Convert `v` to the wider representation, if `v` holds the
    /// narrower type.
    pub fn apply(&self, v: &Value) -> Option<Value> {
        (self.view)(v)
    }
}

impl fmt::Debug for Upcast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Upcast(-> {})", self.token.name)
    }
}

/// A value that can travel through dispatch.
///
/// Implement [`Payload::widens`] to declare the wider keys this type may
/// satisfy. Most types keep the empty default:
///
/// ```rust,ignore
/// struct DebitAccount { amount: u64 }
/// impl Payload for DebitAccount {}
/// ```
///
/// A widened type names each edge through [`upcast`]:
///
/// ```rust,ignore
/// impl Payload for Deposit {
///     fn widens() -> Vec<Upcast> {
///         upcast(|d: Arc<Deposit>| Transaction::Deposit(d))
///     }
/// }
/// ```
pub trait Payload: Any + Send + Sync {
    /// The wider keys this type can stand in for, nearest first.
    fn widens() -> Vec<Upcast>
    where
        Self: Sized,
    {
        Vec::new()
    }
}

/// Declare that `T` widens to `B`, converting with `f`.
///
/// The returned edges include `B`'s own widening edges composed behind
/// `f`, so edge sets are transitively flat by construction.
pub fn upcast<T, B>(f: fn(Arc<T>) -> B) -> Vec<Upcast>
where
    T: Any + Send + Sync,
    B: Payload,
{
    let direct = Upcast {
        token: TypeToken::of::<B>(),
        view: Arc::new(move |v: &Value| {
            v.clone()
                .downcast::<T>()
                .ok()
                .map(|t| Arc::new(f(t)) as Value)
        }),
    };
    let mut edges = vec![direct.clone()];
    for base in B::widens() {
        let first = Arc::clone(&direct.view);
        let rest = Arc::clone(&base.view);
        edges.push(Upcast {
            token: base.token,
            view: Arc::new(move |v: &Value| first(v).and_then(|b| rest(&b))),
        });
    }
    edges
}

/// Capture the flattened, deduplicated widening edges of `T`.
pub fn upcasts_of<T: Payload>() -> Arc<[Upcast]> {
    let mut seen = Vec::new();
    let mut edges: Vec<Upcast> = Vec::new();
    for edge in T::widens() {
        if !seen.contains(&edge.token.id) {
            seen.push(edge.token.id);
            edges.push(edge);
        }
    }
    edges.into()
}

/// A dispatch key.
#[derive(Clone, Debug)]
pub enum Key {
    /// A runtime type, subject to variant matching.
    Type(TypeToken),
    /// An opaque name, matched by equality only.
    Name(Arc<str>),
    /// The wildcard key; matches every request.
    Any,
}

impl Key {
    /// The type key for `T`.
    pub fn of<T: Any>() -> Self {
        Key::Type(TypeToken::of::<T>())
    }

    /// An invariant name key.
    pub fn name(name: impl Into<Arc<str>>) -> Self {
        Key::Name(name.into())
    }

    /// The hashable identity of this key.
    pub fn atom(&self) -> KeyAtom {
        match self {
            Key::Type(t) => KeyAtom::Type(t.id()),
            Key::Name(n) => KeyAtom::Name(Arc::clone(n)),
            Key::Any => KeyAtom::Any,
        }
    }

    /// The type token, when this is a type key.
    pub fn token(&self) -> Option<TypeToken> {
        match self {
            Key::Type(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Type(t) => write!(f, "{}", t.name()),
            Key::Name(n) => write!(f, "{:?}", n),
            Key::Any => f.write_str("<any>"),
        }
    }
}

/// Hashable identity of a [`Key`].
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum KeyAtom {
    /// Identity of a type key.
    Type(TypeId),
    /// Identity of a name key.
    Name(Arc<str>),
    /// Identity of the wildcard key.
    Any,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Narrow(u32);

    #[derive(Clone)]
    struct Wide(u32);

    #[derive(Clone)]
    struct Widest(u32);

    impl Payload for Widest {}

    impl Payload for Wide {
        fn widens() -> Vec<Upcast> {
            upcast(|w: Arc<Wide>| Widest(w.0))
        }
    }

    impl Payload for Narrow {
        fn widens() -> Vec<Upcast> {
            upcast(|n: Arc<Narrow>| Wide(n.0))
        }
    }

    #[test]
    fn tokens_compare_by_type() {
        assert_eq!(TypeToken::of::<Narrow>(), TypeToken::of::<Narrow>());
        assert_ne!(TypeToken::of::<Narrow>(), TypeToken::of::<Wide>());
    }

    #[test]
    fn upcasts_flatten_transitively() {
        let edges = upcasts_of::<Narrow>();
        let tokens: Vec<_> = edges.iter().map(|e| e.token()).collect();
        assert_eq!(
            tokens,
            vec![TypeToken::of::<Wide>(), TypeToken::of::<Widest>()]
        );
    }

    #[test]
    fn views_convert_through_the_chain() {
        let edges = upcasts_of::<Narrow>();
        let v = value(Narrow(7));
        let widest = edges[1].apply(&v).expect("composed view");
        assert_eq!(coerce::<Widest>(&widest).unwrap().0, 7);
    }

    #[test]
    fn view_rejects_foreign_values() {
        let edges = upcasts_of::<Narrow>();
        let v = value(Wide(1));
        assert!(edges[0].apply(&v).is_none());
    }

    #[test]
    fn key_atoms_hash_names_by_content() {
        let a = Key::name("application/json").atom();
        let b = Key::name(String::from("application/json")).atom();
        assert_eq!(a, b);
    }
}
