//! Renderable element shapes.
//!
//! Everything a component can return is one variant of [`Element`]. Elements
//! are cheap to clone: payloads sit behind `Rc`, and component props are an
//! `Rc<dyn Any>` compared by pointer identity when a child instance decides
//! whether new props invalidate it.

use std::any::{Any, TypeId};
use std::hash::Hash;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::dispatcher::Hooks;
use crate::hash::hash_one;
use crate::lifecycle::{self, Lifecycle};
use crate::Rendered;

/// Hash of an explicit element key.
pub type Key = u64;

/// Identity of a component program: the function item for function
/// components, the implementing type for lifecycle components. Two elements
/// with different identities never reuse each other's instances.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ComponentId(u64);

impl ComponentId {
    fn of_fn(addr: usize) -> Self {
        Self(addr as u64)
    }

    fn of_type<T: 'static>() -> Self {
        Self(hash_one(&TypeId::of::<T>()))
    }
}

/// Type-erased component props, compared by pointer identity.
#[derive(Clone)]
pub struct Props(Rc<dyn Any>);

impl Props {
    pub fn new<P: 'static>(props: P) -> Self {
        Self(Rc::new(props))
    }

    pub fn downcast_ref<P: 'static>(&self) -> Option<&P> {
        self.0.downcast_ref::<P>()
    }

    pub fn same(&self, other: &Props) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

pub(crate) type InvokeFn = Rc<dyn Fn(&mut Hooks<'_>, &Props) -> Rendered>;

#[derive(Clone)]
pub struct HostElement {
    pub tag: Rc<str>,
    pub attrs: Rc<[(Rc<str>, Rc<str>)]>,
    pub children: Rc<[Element]>,
}

#[derive(Clone)]
pub struct ComponentElement {
    pub(crate) identity: ComponentId,
    pub(crate) key: Option<Key>,
    pub(crate) props: Props,
    pub(crate) invoke: InvokeFn,
}

impl ComponentElement {
    pub fn identity(&self) -> ComponentId {
        self.identity
    }

    pub fn key(&self) -> Option<Key> {
        self.key
    }
}

#[derive(Clone)]
pub struct ProviderElement {
    pub(crate) slot: u64,
    pub(crate) value: Rc<dyn Any>,
    pub(crate) children: Rc<[Element]>,
}

/// The one tagged union of renderable shapes.
#[derive(Clone)]
pub enum Element {
    /// Renders to nothing.
    Nothing,
    Text(Rc<str>),
    Host(HostElement),
    Fragment(Vec<Element>),
    Component(ComponentElement),
    Provider(ProviderElement),
}

impl Element {
    /// Attaches an explicit key to a component element so its instance
    /// survives reordering among siblings. No-op for other shapes.
    pub fn keyed<K: Hash>(mut self, key: &K) -> Element {
        if let Element::Component(ref mut component) = self {
            component.key = Some(hash_one(key));
        }
        self
    }
}

pub fn text(value: impl Into<Rc<str>>) -> Element {
    Element::Text(value.into())
}

pub fn host(
    tag: impl Into<Rc<str>>,
    attrs: impl IntoIterator<Item = (Rc<str>, Rc<str>)>,
    children: impl IntoIterator<Item = Element>,
) -> Element {
    Element::Host(HostElement {
        tag: tag.into(),
        attrs: attrs.into_iter().collect::<Vec<_>>().into(),
        children: children.into_iter().collect::<Vec<_>>().into(),
    })
}

pub fn attr(name: &str, value: &str) -> (Rc<str>, Rc<str>) {
    (Rc::from(name), Rc::from(value))
}

pub fn fragment(children: impl IntoIterator<Item = Element>) -> Element {
    Element::Fragment(children.into_iter().collect())
}

/// Builds a component element from a function item and its props. Identity
/// is the function's address, so every call site naming the same function
/// shares one identity.
pub fn component<P: 'static>(run: fn(&mut Hooks<'_>, &P) -> Rendered, props: P) -> Element {
    let identity = ComponentId::of_fn(run as usize);
    let invoke: InvokeFn = Rc::new(move |hooks, props: &Props| {
        let props = props
            .downcast_ref::<P>()
            .expect("component invoked with props of a different type");
        run(hooks, props)
    });
    Element::Component(ComponentElement {
        identity,
        key: None,
        props: Props::new(props),
        invoke,
    })
}

/// Builds an element for a [`Lifecycle`] implementation. Identity is the
/// implementing type.
pub fn stateful<L: Lifecycle>(props: L::Props) -> Element {
    let identity = ComponentId::of_type::<L>();
    let invoke: InvokeFn = Rc::new(move |hooks, props: &Props| {
        let props = props
            .downcast_ref::<L::Props>()
            .expect("lifecycle component invoked with props of a different type");
        lifecycle::render_stateful::<L>(hooks, props)
    });
    Element::Component(ComponentElement {
        identity,
        key: None,
        props: Props::new(props),
        invoke,
    })
}

static NEXT_CONTEXT_SLOT: AtomicU64 = AtomicU64::new(1);

/// A typed context channel. Providers push a value for their subtree;
/// `use_context` reads the nearest one.
pub struct Context<T> {
    slot: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Context<T> {}

impl<T: Clone + 'static> Context<T> {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            slot: NEXT_CONTEXT_SLOT.fetch_add(1, Ordering::Relaxed),
            _marker: PhantomData,
        }
    }

    pub(crate) fn slot(&self) -> u64 {
        self.slot
    }

    pub fn provide(&self, value: T, children: impl IntoIterator<Item = Element>) -> Element {
        Element::Provider(ProviderElement {
            slot: self.slot,
            value: Rc::new(value),
            children: children.into_iter().collect::<Vec<_>>().into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comp_a(_hooks: &mut Hooks<'_>, _props: &u32) -> Rendered {
        Ok(Element::Nothing)
    }

    fn comp_b(_hooks: &mut Hooks<'_>, _props: &u32) -> Rendered {
        Ok(Element::Nothing)
    }

    fn identity_of(element: &Element) -> ComponentId {
        match element {
            Element::Component(c) => c.identity(),
            _ => panic!("not a component"),
        }
    }

    #[test]
    fn same_function_same_identity() {
        assert_eq!(
            identity_of(&component(comp_a, 1)),
            identity_of(&component(comp_a, 2))
        );
    }

    #[test]
    fn different_functions_different_identity() {
        assert_ne!(
            identity_of(&component(comp_a, 1)),
            identity_of(&component(comp_b, 1))
        );
    }

    #[test]
    fn props_compare_by_pointer() {
        let a = Props::new(5u32);
        let b = a.clone();
        let c = Props::new(5u32);
        assert!(a.same(&b));
        assert!(!a.same(&c));
    }

    #[test]
    fn keyed_sets_component_key() {
        let element = component(comp_a, 1).keyed(&"row-1");
        match element {
            Element::Component(c) => assert!(c.key().is_some()),
            _ => panic!("not a component"),
        }
    }

    #[test]
    fn contexts_get_unique_slots() {
        let a: Context<u32> = Context::new();
        let b: Context<u32> = Context::new();
        assert_ne!(a.slot(), b.slot());
    }
}
