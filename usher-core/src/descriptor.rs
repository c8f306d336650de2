//! Handler descriptors: bindings grouped by policy, built once and
//! memoized per handler type.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::binding::Binding;
use crate::error::DispatchError;
use crate::filter::FilterProvider;
use crate::key::{Key, KeyAtom, TypeToken};
use crate::policy::Policy;
use crate::result::{HandleResult, NOT_HANDLED};
use crate::spec::{build_descriptor, HandlerSpec};

struct Node {
    binding: Arc<Binding>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// The bindings a policy holds for one handler: an ordered variant list
/// (more-specific first, wildcard last), a key index into it, and
/// invariant buckets for name keys.
pub struct PolicyBindings {
    policy: Policy,
    nodes: Vec<Node>,
    head: Option<usize>,
    tail: Option<usize>,
    index: HashMap<KeyAtom, usize>,
    invariant: HashMap<KeyAtom, Vec<Arc<Binding>>>,
}

impl PolicyBindings {
    pub(crate) fn new(policy: Policy) -> Self {
        PolicyBindings {
            policy,
            nodes: Vec::new(),
            head: None,
            tail: None,
            index: HashMap::new(),
            invariant: HashMap::new(),
        }
    }

    /// The owning policy.
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Number of variant bindings.
    pub fn variant_len(&self) -> usize {
        self.nodes.len()
    }

    fn push_back(&mut self, binding: Arc<Binding>) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            binding,
            prev: self.tail,
            next: None,
        });
        if let Some(tail) = self.tail {
            self.nodes[tail].next = Some(id);
        } else {
            self.head = Some(id);
        }
        self.tail = Some(id);
        id
    }

    fn insert_before(&mut self, binding: Arc<Binding>, at: usize) -> usize {
        let id = self.nodes.len();
        let prev = self.nodes[at].prev;
        self.nodes.push(Node {
            binding,
            prev,
            next: Some(at),
        });
        self.nodes[at].prev = Some(id);
        match prev {
            Some(p) => self.nodes[p].next = Some(id),
            None => self.head = Some(id),
        }
        id
    }

    /// Insert `binding`, keeping the variant list sorted more-specific
    /// first and indexing the first position for its key.
    pub(crate) fn insert(&mut self, binding: Arc<Binding>) {
        let key = binding.key().clone();
        let atom = key.atom();
        let (variant, unknown) = self.policy.variant_key(&key);
        if !variant {
            self.invariant.entry(atom).or_default().push(binding);
            return;
        }
        let indexed = self.index.get(&atom).copied();
        if unknown {
            let id = self.push_back(binding);
            if indexed.is_none() {
                self.index.insert(atom, id);
            }
            return;
        }
        let mut at = indexed.or(self.head);
        while let Some(i) = at {
            if self.policy.less(&binding, &self.nodes[i].binding) {
                break;
            }
            at = self.nodes[i].next;
        }
        let id = match at {
            Some(i) => self.insert_before(binding, i),
            None => self.push_back(binding),
        };
        if indexed.is_none() {
            self.index.insert(atom, id);
        }
    }

    /// Reduce the bindings plausible for `key`: the variant list starting
    /// at the indexed position, or the invariant bucket followed by the
    /// wildcard segment. The reducer returns `(result, done)`.
    pub(crate) fn reduce(
        &self,
        key: &Key,
        mut reducer: impl FnMut(&Arc<Binding>, HandleResult) -> (HandleResult, bool),
    ) -> HandleResult {
        let mut result = NOT_HANDLED;
        let (variant, _) = self.policy.variant_key(key);
        if variant {
            let mut at = self.index.get(&key.atom()).copied().or(self.head);
            while let Some(i) = at {
                let (next, done) = reducer(&self.nodes[i].binding, result);
                result = next;
                if done {
                    break;
                }
                at = self.nodes[i].next;
            }
            return result;
        }
        if let Some(bucket) = self.invariant.get(&key.atom()) {
            for binding in bucket {
                let (next, done) = reducer(binding, result);
                result = next;
                if done {
                    return result;
                }
            }
        }
        // Wildcard handlers run last for invariant keys too.
        let mut at = self.index.get(&KeyAtom::Any).copied();
        while let Some(i) = at {
            let (next, done) = reducer(&self.nodes[i].binding, result);
            result = next;
            if done {
                break;
            }
            at = self.nodes[i].next;
        }
        result
    }

    /// Visit one binding per distinct key (the indexed heads and one per
    /// invariant bucket); inference needs no more to infer a handler type.
    pub(crate) fn representatives(&self, mut visit: impl FnMut(&Arc<Binding>)) {
        for id in self.index.values() {
            visit(&self.nodes[*id].binding);
        }
        for bucket in self.invariant.values() {
            if let Some(first) = bucket.first() {
                visit(first);
            }
        }
    }
}

/// Bindings for one handler type, grouped by policy.
pub struct HandlerDescriptor {
    token: TypeToken,
    name: Arc<str>,
    bindings: HashMap<Policy, PolicyBindings>,
    filters: Vec<Arc<dyn FilterProvider>>,
}

impl HandlerDescriptor {
    pub(crate) fn new(
        token: TypeToken,
        name: Arc<str>,
        bindings: HashMap<Policy, PolicyBindings>,
        filters: Vec<Arc<dyn FilterProvider>>,
    ) -> Self {
        HandlerDescriptor {
            token,
            name,
            bindings,
            filters,
        }
    }

    /// The described handler type.
    pub fn token(&self) -> TypeToken {
        self.token
    }

    /// Diagnostic name of the handler type.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bindings for `policy`, if any were declared.
    pub fn bindings_for(&self, policy: Policy) -> Option<&PolicyBindings> {
        self.bindings.get(&policy)
    }

    /// Every policy with bindings.
    pub fn policies(&self) -> impl Iterator<Item = Policy> + '_ {
        self.bindings.keys().copied()
    }

    /// Descriptor-level filter providers, applied to every binding.
    pub fn filters(&self) -> &[Arc<dyn FilterProvider>] {
        &self.filters
    }
}

/// Observes descriptor and binding creation; inference subscribes here.
pub trait DescriptorObserver: Send + Sync {
    /// A binding was created for `policy` on `descriptor`.
    fn binding_created(
        &self,
        policy: Policy,
        descriptor: &HandlerDescriptor,
        binding: &Arc<Binding>,
    ) {
        let _ = (policy, descriptor, binding);
    }

    /// A descriptor finished building.
    fn descriptor_created(&self, descriptor: &HandlerDescriptor) {
        let _ = descriptor;
    }
}

/// Builds and memoizes handler descriptors.
///
/// Registration is idempotent: the first registration of a type builds
/// and announces its descriptor; later registrations return the memo.
#[derive(Default)]
pub struct DescriptorFactory {
    descriptors: RwLock<HashMap<TypeId, Arc<HandlerDescriptor>>>,
    observers: RwLock<Vec<Arc<dyn DescriptorObserver>>>,
}

impl DescriptorFactory {
    /// An empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to descriptor and binding creation.
    pub fn observe(&self, observer: Arc<dyn DescriptorObserver>) {
        self.observers
            .write()
            .expect("observers poisoned")
            .push(observer);
    }

    /// The memoized descriptor for a type, if registered.
    pub fn descriptor(&self, id: TypeId) -> Option<Arc<HandlerDescriptor>> {
        self.descriptors
            .read()
            .expect("descriptors poisoned")
            .get(&id)
            .cloned()
    }

    /// Register `T`, building its descriptor on first sight.
    pub fn register<T: HandlerSpec>(&self) -> Result<Arc<HandlerDescriptor>, DispatchError> {
        let id = TypeId::of::<T>();
        if let Some(found) = self.descriptor(id) {
            return Ok(found);
        }
        let observers: Vec<Arc<dyn DescriptorObserver>> = self
            .observers
            .read()
            .expect("observers poisoned")
            .clone();
        let built = Arc::new(build_descriptor::<T>(&observers)?);
        let mut descriptors = self.descriptors.write().expect("descriptors poisoned");
        if let Some(raced) = descriptors.get(&id) {
            return Ok(Arc::clone(raced));
        }
        descriptors.insert(id, Arc::clone(&built));
        drop(descriptors);
        for observer in &observers {
            observer.descriptor_created(&built);
        }
        Ok(built)
    }

    /// Register `T` and report whether this call added it.
    pub fn register_new<T: HandlerSpec>(
        &self,
    ) -> Result<(Arc<HandlerDescriptor>, bool), DispatchError> {
        let id = TypeId::of::<T>();
        let known = self.descriptor(id).is_some();
        let descriptor = self.register::<T>()?;
        Ok((descriptor, !known))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{BindingFlags, HandleContext, Resolved};
    use crate::key::{upcast, upcasts_of, Payload, Upcast};
    use crate::spec::{HandlerSpec, HandlerSpecBuilder};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct Narrow;
    #[derive(Clone)]
    struct Wide;
    #[derive(Clone)]
    struct Widest;

    impl Payload for Widest {}
    impl Payload for Wide {
        fn widens() -> Vec<Upcast> {
            upcast(|_: Arc<Wide>| Widest)
        }
    }
    impl Payload for Narrow {
        fn widens() -> Vec<Upcast> {
            upcast(|_: Arc<Narrow>| Wide)
        }
    }

    fn test_binding(policy: Policy, key: Key, upcasts: Arc<[Upcast]>) -> Arc<Binding> {
        Arc::new(Binding::new(
            policy,
            key,
            upcasts,
            None,
            BindingFlags::default(),
            Vec::new(),
            Vec::new(),
            Arc::new(|_: &mut HandleContext<'_>, _: Vec<Resolved>| Ok(Vec::new())),
            false,
            Arc::from("test"),
        ))
    }

    fn visited_origins(bindings: &PolicyBindings, key: &Key) -> Vec<String> {
        let mut keys = Vec::new();
        bindings.reduce(key, |binding, result| {
            keys.push(binding.key().to_string());
            (result, false)
        });
        keys
    }

    #[test]
    fn variant_list_sorts_more_specific_first() {
        let mut bindings = PolicyBindings::new(Policy::Handles);
        bindings.insert(test_binding(
            Policy::Handles,
            Key::of::<Widest>(),
            upcasts_of::<Widest>(),
        ));
        bindings.insert(test_binding(
            Policy::Handles,
            Key::of::<Narrow>(),
            upcasts_of::<Narrow>(),
        ));
        bindings.insert(test_binding(
            Policy::Handles,
            Key::of::<Wide>(),
            upcasts_of::<Wide>(),
        ));

        let order = visited_origins(&bindings, &Key::of::<Narrow>());
        assert_eq!(order.len(), 3);
        assert!(order[0].ends_with("Narrow"));
        assert!(order[1].ends_with("Wide"));
        assert!(order[2].ends_with("Widest"));
    }

    #[test]
    fn wildcard_bindings_stay_last() {
        let mut bindings = PolicyBindings::new(Policy::Handles);
        bindings.insert(test_binding(Policy::Handles, Key::Any, Arc::from(Vec::new())));
        bindings.insert(test_binding(
            Policy::Handles,
            Key::of::<Narrow>(),
            upcasts_of::<Narrow>(),
        ));

        let order = visited_origins(&bindings, &Key::of::<Narrow>());
        assert!(order[0].ends_with("Narrow"));
        assert_eq!(order[1], "<any>");
    }

    #[test]
    fn invariant_keys_bucket_separately() {
        let mut bindings = PolicyBindings::new(Policy::Maps);
        bindings.insert(test_binding(
            Policy::Maps,
            Key::name("application/json"),
            Arc::from(Vec::new()),
        ));
        assert_eq!(bindings.variant_len(), 0);
        let order = visited_origins(&bindings, &Key::name("application/json"));
        assert_eq!(order.len(), 1);
    }

    struct Memoized;
    impl Payload for Memoized {}
    impl HandlerSpec for Memoized {
        fn describe(b: &mut HandlerSpecBuilder<Self>) {
            b.no_constructor();
            b.provides(|_: &Memoized| Widest);
        }
    }

    #[test]
    fn registration_is_memoized() {
        let factory = DescriptorFactory::new();
        let first = factory.register::<Memoized>().unwrap();
        let second = factory.register::<Memoized>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    struct CountingObserver {
        bindings: AtomicUsize,
        descriptors: AtomicUsize,
    }

    impl DescriptorObserver for CountingObserver {
        fn binding_created(
            &self,
            _policy: Policy,
            _descriptor: &HandlerDescriptor,
            _binding: &Arc<Binding>,
        ) {
            self.bindings.fetch_add(1, Ordering::SeqCst);
        }

        fn descriptor_created(&self, _descriptor: &HandlerDescriptor) {
            self.descriptors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn observers_see_each_creation_once() {
        let factory = DescriptorFactory::new();
        let observer = Arc::new(CountingObserver {
            bindings: AtomicUsize::new(0),
            descriptors: AtomicUsize::new(0),
        });
        factory.observe(Arc::clone(&observer) as Arc<dyn DescriptorObserver>);
        factory.register::<Memoized>().unwrap();
        factory.register::<Memoized>().unwrap();
        assert_eq!(observer.bindings.load(Ordering::SeqCst), 1);
        assert_eq!(observer.descriptors.load(Ordering::SeqCst), 1);
    }
}
