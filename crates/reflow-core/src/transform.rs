//! Tree expansion.
//!
//! After a component body returns an element tree, the transform walks it
//! synchronously: literal shapes are copied into the output batch, provider
//! values extend the context map for their subtree, and component elements
//! are resolved against the instance registry. Child instances are never
//! rendered inline; the batch carries a slot placeholder and the child's
//! own loop streams its output independently.

use std::rc::Rc;

use crate::context::{ContextId, ContextOptions, RenderContext};
use crate::dispatcher::ContextMap;
use crate::element::Element;
use crate::render;
use crate::{BoundaryFn, ComponentError};

/// One node of committed output. `Slot` marks where a child instance's own
/// output stream splices in.
#[derive(Clone, Debug)]
pub enum OutputNode {
    Text(Rc<str>),
    Host(HostOutput),
    Slot(ContextId),
}

#[derive(Clone, Debug)]
pub struct HostOutput {
    pub tag: Rc<str>,
    pub attrs: Rc<[(Rc<str>, Rc<str>)]>,
    pub children: Rc<[OutputNode]>,
}

pub type OutputBatch = Vec<OutputNode>;

/// Expands `element` within `context`'s pass: mounts or adopts children,
/// evicts instances the pass no longer names, and returns the batch.
pub(crate) fn expand(
    context: &Rc<RenderContext>,
    element: &Element,
) -> Result<OutputBatch, ComponentError> {
    context.children_mut().begin_pass();
    let map = context.dispatcher().context_map();
    let boundary = context.child_boundary();
    let mut batch = Vec::new();
    walk(context, element, &map, &boundary, &mut batch)?;
    let evicted = context.children_mut().end_pass();
    for child in evicted {
        log::trace!("evicting child context {:?}", child.id());
        context
            .scheduler()
            .spawn_local(Box::pin(async move { child.destroy().await }));
    }
    Ok(batch)
}

fn walk(
    context: &Rc<RenderContext>,
    element: &Element,
    map: &ContextMap,
    boundary: &BoundaryFn,
    batch: &mut Vec<OutputNode>,
) -> Result<(), ComponentError> {
    match element {
        Element::Nothing => {}
        Element::Text(text) => batch.push(OutputNode::Text(Rc::clone(text))),
        Element::Fragment(children) => {
            for child in children {
                walk(context, child, map, boundary, batch)?;
            }
        }
        Element::Provider(provider) => {
            let mut extended = (**map).clone();
            extended.insert(provider.slot, Rc::clone(&provider.value));
            let extended = Rc::new(extended);
            for child in provider.children.iter() {
                walk(context, child, &extended, boundary, batch)?;
            }
        }
        Element::Host(host) => {
            let mut children = Vec::new();
            for child in host.children.iter() {
                walk(context, child, map, boundary, &mut children)?;
            }
            batch.push(OutputNode::Host(HostOutput {
                tag: Rc::clone(&host.tag),
                attrs: Rc::clone(&host.attrs),
                children: children.into(),
            }));
        }
        Element::Component(component) => {
            let position = context
                .children_mut()
                .next_position(component.identity, component.key);
            let adopted = context.children_mut().adopt(component.identity, position);
            let child = match adopted {
                Some(child) => {
                    child.set_program(
                        Rc::clone(&component.invoke),
                        component.props.clone(),
                        Rc::clone(map),
                    );
                    child
                }
                None => {
                    let (child, output) = RenderContext::create(ContextOptions {
                        invoke: Rc::clone(&component.invoke),
                        props: component.props.clone(),
                        parent: Some(Rc::downgrade(context)),
                        controller: context.controller(),
                        scheduler: context.scheduler(),
                        context_map: Rc::clone(map),
                        boundary: Rc::clone(boundary),
                    });
                    context.controller().hello(&child, output);
                    context
                        .children_mut()
                        .insert(component.identity, position, Rc::clone(&child));
                    context
                        .scheduler()
                        .spawn_local(Box::pin(render::drive(Rc::clone(&child))));
                    child
                }
            };
            batch.push(OutputNode::Slot(child.id()));
        }
    }
    Ok(())
}
