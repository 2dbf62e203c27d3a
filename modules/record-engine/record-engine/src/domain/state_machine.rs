//! Workflow state machine bound to one record field.

use record_engine_sdk::Record;
use serde_json::Value;

use super::error::DomainError;
use super::plugins::{HookContext, Named, TransitionHook};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct State {
    pub value: String,
    pub label: String,
}

#[derive(Clone, Debug)]
pub struct Transition {
    pub trigger: String,
    pub label: String,
    pub sources: Vec<String>,
    pub dest: String,
    pub on_exit: Option<Named<dyn TransitionHook>>,
    pub on_enter: Option<Named<dyn TransitionHook>>,
}

/// Result of a successful trigger. `record` carries the destination state and
/// any change made by the exit and enter hooks.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionOutcome {
    pub source: String,
    pub dest: String,
    pub record: Record,
}

#[derive(Clone, Debug)]
pub struct StateMachine {
    field: String,
    states: Vec<State>,
    transitions: Vec<Transition>,
}

impl StateMachine {
    /// # Errors
    /// Returns a message when there are no states, a state value repeats, a
    /// trigger is declared twice for the same source, or a trigger refers to
    /// an undeclared state.
    pub fn new(
        field: impl Into<String>,
        states: Vec<State>,
        transitions: Vec<Transition>,
    ) -> Result<Self, String> {
        if states.is_empty() {
            return Err("state machine declares no states".to_owned());
        }
        for (i, s) in states.iter().enumerate() {
            if states[..i].iter().any(|p| p.value == s.value) {
                return Err(format!("duplicate state '{}'", s.value));
            }
        }
        let sm = Self {
            field: field.into(),
            states,
            transitions,
        };
        for (i, t) in sm.transitions.iter().enumerate() {
            let overlaps = sm.transitions[..i]
                .iter()
                .any(|p| p.trigger == t.trigger && p.sources.iter().any(|s| t.sources.contains(s)));
            if overlaps {
                return Err(format!("trigger '{}' is declared twice for one source", t.trigger));
            }
            if t.sources.is_empty() {
                return Err(format!("trigger '{}' has no source state", t.trigger));
            }
            if let Some(bad) = t.sources.iter().find(|s| !sm.is_state(s)) {
                return Err(format!(
                    "trigger '{}' has undeclared source state '{bad}'",
                    t.trigger
                ));
            }
            if !sm.is_state(&t.dest) {
                return Err(format!(
                    "trigger '{}' has undeclared destination state '{}'",
                    t.trigger, t.dest
                ));
            }
        }
        Ok(sm)
    }

    /// Record field holding the current state.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    #[must_use]
    pub fn states(&self) -> &[State] {
        &self.states
    }

    #[must_use]
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// The first declared state.
    #[must_use]
    pub fn initial_state(&self) -> &str {
        self.states.first().map_or("", |s| s.value.as_str())
    }

    #[must_use]
    pub fn is_state(&self, value: &str) -> bool {
        self.states.iter().any(|s| s.value == value)
    }

    /// State of `record`; the initial state when the field is unset.
    #[must_use]
    pub fn current_state<'a>(&'a self, record: &'a Record) -> &'a str {
        match record.get(&self.field) {
            Some(Value::String(s)) if !s.is_empty() => s,
            _ => self.initial_state(),
        }
    }

    /// Triggers whose sources include `state`, in declaration order.
    #[must_use]
    pub fn available_triggers(&self, state: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for t in &self.transitions {
            if t.sources.iter().any(|s| s == state) && !out.contains(&t.trigger.as_str()) {
                out.push(&t.trigger);
            }
        }
        out
    }

    /// Fire `trigger` on a copy of `record`.
    ///
    /// Runs the exit hook, sets the workflow field to the destination, then
    /// runs the enter hook. `record` itself is never modified.
    ///
    /// # Errors
    /// - [`DomainError::StateMachine`] when the trigger is unknown or not
    ///   valid from the current state
    /// - any error raised by the exit or enter hook
    pub async fn trigger(
        &self,
        ctx: &HookContext<'_>,
        record: &Record,
        trigger: &str,
        payload: &Record,
    ) -> Result<TransitionOutcome, DomainError> {
        let source = self.current_state(record).to_owned();
        let transition = self
            .transitions
            .iter()
            .find(|t| t.trigger == trigger && t.sources.iter().any(|s| *s == source))
            .ok_or_else(|| self.no_transition(trigger, &source))?;

        let mut next = record.clone();
        if let Some(hook) = &transition.on_exit {
            tracing::debug!(hook = %hook.name, state = %source, "running exit hook");
            hook.run(ctx, &mut next, payload).await?;
        }
        next.insert(self.field.clone(), Value::String(transition.dest.clone()));
        if let Some(hook) = &transition.on_enter {
            tracing::debug!(hook = %hook.name, state = %transition.dest, "running enter hook");
            hook.run(ctx, &mut next, payload).await?;
        }
        // hooks may touch anything except the state itself
        next.insert(self.field.clone(), Value::String(transition.dest.clone()));

        Ok(TransitionOutcome {
            source,
            dest: transition.dest.clone(),
            record: next,
        })
    }

    fn no_transition(&self, trigger: &str, state: &str) -> DomainError {
        let valid: Vec<String> = self
            .available_triggers(state)
            .into_iter()
            .map(str::to_owned)
            .collect();
        let message = if valid.is_empty() {
            format!("Unable to trigger '{trigger}' from state '{state}'.")
        } else {
            format!(
                "Unable to trigger '{trigger}' from state '{state}'. Valid triggers are: {}.",
                valid.join(", ")
            )
        };
        DomainError::StateMachine {
            message,
            valid_triggers: valid,
        }
    }
}
