use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use reflow_core::{
    component, text, ActionKind, Cleanup, DeferredAction, DepsKey, Halt, Hooks, Rendered,
    Suspension,
};
use reflow_shell::{render, Delay, RenderOptions, SettleStrategy};

#[derive(Clone)]
struct TickerProps {
    limit: u32,
    tick: Duration,
}

fn ticker(hooks: &mut Hooks<'_>, props: &TickerProps) -> Rendered {
    let (count, set_count) = hooks.use_state(|| 1u32);
    if count < props.limit {
        let queue = hooks.queue();
        let set = set_count.clone();
        let tick = props.tick;
        hooks.use_effect(DepsKey::of(&count), move || {
            queue.add(DeferredAction::deferred(ActionKind::Event, async move {
                Delay::new(tick).await;
                set.update(|n| n + 1);
                Ok(())
            }));
            Ok(Cleanup::none())
        });
    }
    Ok(text(format!("A: {count}")))
}

#[test]
fn timed_counter_settles_at_its_limit() {
    let rendered_count = Rc::new(Cell::new(0u32));
    let observed = Rc::clone(&rendered_count);
    let report = render(
        component(
            ticker,
            TickerProps {
                limit: 4,
                tick: Duration::from_millis(30),
            },
        ),
        RenderOptions {
            max_iterations: Some(5),
            settle: SettleStrategy::Timeout(Duration::from_millis(250)),
            rendered: Some(Box::new(move |_| observed.set(observed.get() + 1))),
            on_context: None,
        },
    )
    .unwrap();
    assert_eq!(report.tree.text_content(), "A: 4");
    assert_eq!(report.flushes, 4);
    assert_eq!(rendered_count.get(), 4);
}

fn slow_greeting(hooks: &mut Hooks<'_>, _props: &()) -> Rendered {
    let suspension = hooks.use_memo(DepsKey::unit(), || {
        Suspension::new(Delay::new(Duration::from_millis(30)))
    });
    if !suspension.is_ready() {
        return Err(Halt::Suspend((*suspension).clone()));
    }
    Ok(text("ready"))
}

#[test]
fn suspended_component_renders_after_its_delay() {
    let report = render(
        component(slow_greeting, ()),
        RenderOptions {
            max_iterations: Some(2),
            settle: SettleStrategy::Timeout(Duration::from_millis(250)),
            ..RenderOptions::default()
        },
    )
    .unwrap();
    assert_eq!(report.tree.text_content(), "ready");
    assert_eq!(report.flushes, 1); // nothing flushed for the pending pass
}

#[test]
fn microtask_settle_does_not_wait_for_timers() {
    let report = render(
        component(slow_greeting, ()),
        RenderOptions {
            settle: SettleStrategy::Microtasks,
            ..RenderOptions::default()
        },
    )
    .unwrap();
    // the 30ms suspension never resolves before the quiet tree settles
    assert_eq!(report.tree.text_content(), "");
    assert_eq!(report.flushes, 0);
}
