// Template rendering against a hardware record
//
// The template body is a minijinja template evaluated over the hardware
// JSON. Undefined references are hard errors: a template that renders at
// all is guaranteed to have resolved every key it names.

use minijinja::{Environment, ErrorKind, UndefinedBehavior, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::template::{self, WorkflowPlan};

/// Render a template body against a hardware record and validate the result.
///
/// Returns the validated plan together with the rendered YAML, which is
/// persisted verbatim so the workflow stays reproducible after the template
/// changes. Rendering is deterministic: the same body and hardware document
/// always produce the same bytes.
pub fn render(
    template_id: Uuid,
    body: &str,
    hardware: &serde_json::Value,
) -> Result<(WorkflowPlan, String)> {
    let env = build_environment(hardware);
    let ctx = build_context(template_id, hardware)?;

    let rendered = env
        .render_str(body, ctx)
        .map_err(|e| Error::render(template_id, render_error_chain(&e)))?;

    let plan = template::parse(&rendered)
        .map_err(|e| Error::render(template_id, e.to_string()))?;

    // The parser tolerates an empty worker field because pre-render bodies
    // are not parseable at all; a rendered plan must have resolved every
    // worker selector.
    for task in &plan.tasks {
        if task.worker.trim().is_empty() {
            return Err(Error::render(
                template_id,
                format!("task {:?} rendered an empty worker address", task.name),
            ));
        }
    }

    Ok((plan, rendered))
}

fn build_environment(hardware: &serde_json::Value) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    let doc = hardware.clone();
    env.add_function("interface_ip", move |mac: String| -> std::result::Result<String, minijinja::Error> {
        interfaces(&doc)
            .into_iter()
            .find(|(m, _)| m.eq_ignore_ascii_case(&mac))
            .and_then(|(_, ip)| ip)
            .ok_or_else(|| {
                minijinja::Error::new(
                    ErrorKind::InvalidOperation,
                    format!("hardware record has no interface with MAC {:?}", mac),
                )
            })
    });

    let doc = hardware.clone();
    env.add_function("interface_mac", move |index: usize| -> std::result::Result<String, minijinja::Error> {
        interfaces(&doc)
            .into_iter()
            .nth(index)
            .map(|(mac, _)| mac)
            .ok_or_else(|| {
                minijinja::Error::new(
                    ErrorKind::InvalidOperation,
                    format!("hardware record has no interface at index {}", index),
                )
            })
    });

    env
}

/// Template context: the hardware document's top-level keys, plus the whole
/// document under `hardware`.
fn build_context(template_id: Uuid, hardware: &serde_json::Value) -> Result<Value> {
    let serde_json::Value::Object(fields) = hardware else {
        return Err(Error::render(
            template_id,
            "hardware record is not a JSON object",
        ));
    };
    let mut ctx = fields.clone();
    ctx.insert("hardware".to_string(), hardware.clone());
    Ok(Value::from_serialize(&ctx))
}

/// `(mac, ip)` pairs from `network.interfaces[].dhcp`.
///
/// These are the lookup keys a hardware record must provide at least one
/// of, and the values the template helper functions resolve against.
pub fn interfaces(hardware: &serde_json::Value) -> Vec<(String, Option<String>)> {
    hardware
        .pointer("/network/interfaces")
        .and_then(|v| v.as_array())
        .map(|ifaces| {
            ifaces
                .iter()
                .filter_map(|iface| {
                    let mac = iface.pointer("/dhcp/mac")?.as_str()?.to_string();
                    let ip = iface
                        .pointer("/dhcp/ip/address")
                        .and_then(|v| v.as_str())
                        .map(String::from);
                    Some((mac, ip))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Flatten a minijinja error chain into one line for operator diagnosis
fn render_error_chain(err: &minijinja::Error) -> String {
    let mut msg = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hardware() -> serde_json::Value {
        json!({
            "id": "machine-1",
            "metadata": {"facility": "ewr1"},
            "network": {
                "interfaces": [
                    {"dhcp": {"mac": "AA:AA:AA:AA:AA:AA", "ip": {"address": "192.168.1.5"}}},
                    {"dhcp": {"mac": "BB:BB:BB:BB:BB:BB", "ip": {"address": "192.168.1.6"}}}
                ]
            }
        })
    }

    const BODY: &str = r#"
version: "0.1"
name: provision-{{ id }}
tasks:
  - name: os-install
    worker: "{{ interface_mac(0) }}"
    actions:
      - name: stream-image
        image: alpine
        environment:
          TARGET_IP: "{{ interface_ip('AA:AA:AA:AA:AA:AA') }}"
          FACILITY: "{{ metadata.facility | upper }}"
"#;

    #[test]
    fn renders_against_hardware() {
        let (plan, rendered) = render(Uuid::nil(), BODY, &hardware()).unwrap();
        assert_eq!(plan.name, "provision-machine-1");
        assert_eq!(plan.tasks[0].worker, "AA:AA:AA:AA:AA:AA");
        let env = plan.tasks[0].actions[0].environment.as_ref().unwrap();
        assert_eq!(env.get("TARGET_IP").unwrap(), "192.168.1.5");
        assert_eq!(env.get("FACILITY").unwrap(), "EWR1");
        assert!(rendered.contains("provision-machine-1"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let first = render(Uuid::nil(), BODY, &hardware()).unwrap().1;
        let second = render(Uuid::nil(), BODY, &hardware()).unwrap().1;
        assert_eq!(first, second);
    }

    #[test]
    fn missing_key_is_an_error() {
        let id = Uuid::now_v7();
        let body = BODY.replace("{{ id }}", "{{ network.unknown }}");
        match render(id, &body, &hardware()).unwrap_err() {
            Error::Render { template_id, .. } => assert_eq!(template_id, id),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unknown_mac_is_an_error() {
        let body = BODY.replace("AA:AA:AA:AA:AA:AA'", "CC:CC:CC:CC:CC:CC'");
        assert!(render(Uuid::nil(), body.as_str(), &hardware()).is_err());
    }

    #[test]
    fn empty_worker_is_an_error() {
        let body = BODY.replace("{{ interface_mac(0) }}", "");
        let err = render(Uuid::nil(), &body, &hardware()).unwrap_err();
        assert!(matches!(err, Error::Render { .. }), "got {err:?}");
    }

    #[test]
    fn whole_document_is_reachable_via_hardware_alias() {
        let body = BODY.replace("{{ id }}", "{{ hardware.id }}");
        let (plan, _) = render(Uuid::nil(), &body, &hardware()).unwrap();
        assert_eq!(plan.name, "provision-machine-1");
    }

    #[test]
    fn invalid_rendered_plan_is_a_render_error() {
        let body = BODY.replace("image: alpine", "image: \"Not::An::Image\"");
        let err = render(Uuid::nil(), &body, &hardware()).unwrap_err();
        assert!(matches!(err, Error::Render { .. }), "got {err:?}");
    }
}
