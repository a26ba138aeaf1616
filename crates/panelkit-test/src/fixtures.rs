//! Template fixtures.
//!
//! Capability ids used here: `root`, `panel`, `text`, `button`, `banner`.

/// The smallest valid template.
pub const MINIMAL: &str = r#"
name: X
bootstrap:
  capabilityId: root
components: []
"#;

/// A banner rendered only while `state.flag` is truthy.
pub const CONDITIONAL: &str = r#"
name: conditional
bootstrap: panel
components:
  - block: banner
    condition: "{{ state.flag }}"
    children:
      - block: text
        props: { value: Welcome }
"#;

/// A counter with a state update bound to a button and a host event.
pub const COUNTER: &str = r#"
name: counter
version: 1.2.0
bootstrap:
  block: panel
  props: { title: Counter }
state:
  count: 0
components:
  - block: text
    props: { value: "{{ state.count }}" }
  - block: button
    props: { label: "+1" }
    on: { click: increment }
actions:
  increment:
    type: setState
    path: count
    value: 1
    then: [announce]
  announce:
    type: sendMessage
    message: counted
    payload: { count: "{{ state.count }}" }
  reset:
    type: setState
    path: count
    value: 0
events:
  - event: reset-requested
    action: reset
"#;

/// An assistant request whose reply is stored and acknowledged.
pub const ASSISTANT: &str = r#"
name: assistant
bootstrap: panel
state:
  topic: rust
components:
  - block: text
    props: { value: "{{ state.summary }}" }
  - block: button
    props: { label: Summarise }
    on: { click: summarise }
actions:
  summarise:
    type: requestAI
    prompt: "Summarise {{ state.topic }}"
    context: { topic: "{{ state.topic }}" }
    storeAs: summary
    onSuccess:
      - type: sendMessage
        message: summarised
        payload: { text: "{{ response.text }}" }
"#;

/// A template with one component whose capability is unlikely to exist.
pub const MISSING_BLOCK: &str = r"
name: missing
bootstrap: panel
components:
  - text
  - block: does-not-exist
  - text
";

/// A document whose root is not a mapping.
pub const MALFORMED: &str = "- this\n- is\n- a list\n";

/// A minimal template named `name` bootstrapped on `panel` with one `text`.
#[must_use]
pub fn simple(name: &str) -> String {
    format!(
        "name: {name}\nbootstrap: panel\ncomponents:\n  \
         - block: text\n    props: {{ value: {name} }}\n"
    )
}
