use flow_runtime::{Dependency, DependencyType, DomEvent, NodeHandle, StateError, TemplateNode, Ui};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// I18N providers this host knows how to load.
pub const I18N_PROVIDERS: &[&str] = &["bundled"];

/// A counter with an increment button and a server clock.
pub fn build(ui: &mut Ui) -> Result<(), StateError> {
    ui.register_component_dependencies(
        "CounterButton",
        vec![
            Dependency::new(DependencyType::JavaScript, "/VAADIN/counter-button.js"),
            Dependency::new(DependencyType::Stylesheet, "/VAADIN/counter-button.css"),
        ],
    );
    let header = ui.register_template(
        TemplateNode::element("header").with_property("role", json!("banner")),
    );

    let root = ui.root();
    ui.add_class_name(root, "demo")?;

    let banner = ui.create_element("div")?;
    ui.use_template(banner, header)?;
    ui.append_child(root, banner)?;

    let title = ui.create_element("h1")?;
    ui.set_property(title, "textContent", "Counter")?;
    ui.append_child(root, title)?;

    let label = ui.create_element("span")?;
    ui.set_property(label, "textContent", "0")?;
    ui.append_child(root, label)?;

    let button = ui.create_component("CounterButton", "button")?;
    ui.set_property(button, "textContent", "+1")?;
    ui.set_attribute(button, "type", "button")?;
    ui.append_child(root, button)?;

    let count = Arc::new(AtomicI64::new(0));
    ui.add_event_listener_with_data(
        button,
        "click",
        vec!["event.shiftKey".to_string()],
        move |ui, event| increment(ui, event, label, &count),
    )?;

    tick(ui);
    Ok(())
}

fn increment(ui: &mut Ui, event: &DomEvent, label: NodeHandle, count: &AtomicI64) {
    let step = if event.data["event.shiftKey"].as_bool().unwrap_or(false) {
        10
    } else {
        1
    };
    let value = count.fetch_add(step, Ordering::Relaxed) + step;
    if let Err(err) = ui.set_property(label, "textContent", value.to_string()) {
        log::warn!("failed to update counter label: {err}");
    }
    if value % 100 == 0 {
        ui.execute_js("console.info('milestone', $0)", vec![json!(value).into()]);
    }
}

/// Updates the server clock shown on the root element.
pub fn tick(ui: &mut Ui) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    let root = ui.root();
    if let Err(err) = ui.set_attribute(root, "data-server-time", &now.to_string()) {
        log::warn!("failed to update server time: {err}");
    }
}
