use crate::message::Message;
use crate::value::{matches, Pattern};

use super::runtime::{receive, ProcessResult};

type Handler<S> = Box<dyn Fn(&mut S, &Message) + Send>;

struct Rule<S> {
    pattern: Pattern,
    handler: Option<Handler<S>>,
    keep_running: bool,
}

/// A pattern-driven message loop over some per-process state `S`.
///
/// Rules are matched most-recently-added first, so a handler registered
/// later can shadow one registered earlier for an overlapping pattern.
/// Whether a match keeps the loop running is fixed at registration time by
/// `keep_running`, not computed from the handler's return value: a stop
/// rule like `add_stop` needs no handler at all.
pub struct Loop<S> {
    rules: Vec<Rule<S>>,
}

impl<S> Default for Loop<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Loop<S> {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Register a rule that runs `handler` on a match and keeps the loop
    /// running afterward.
    pub fn add_pattern(
        &mut self,
        pattern: Pattern,
        handler: impl Fn(&mut S, &Message) + Send + 'static,
    ) -> &mut Self {
        self.rules.push(Rule { pattern, handler: Some(Box::new(handler)), keep_running: true });
        self
    }

    /// Register the same handler for every pattern in `patterns`.
    pub fn add_handlers(
        &mut self,
        patterns: Vec<Pattern>,
        handler: impl Fn(&mut S, &Message) + Send + Clone + 'static,
    ) -> &mut Self {
        for pattern in patterns {
            let handler = handler.clone();
            self.add_pattern(pattern, move |state, message| handler(state, message));
        }
        self
    }

    /// Register a rule that, on a match, stops [`Loop::run`] without
    /// running any handler.
    pub fn add_stop(&mut self, pattern: Pattern) -> &mut Self {
        self.rules.push(Rule { pattern, handler: None, keep_running: false });
        self
    }

    /// Match `message` against the registered rules, most recent first.
    /// Runs the matching rule's handler (if any) and returns whether the
    /// loop should keep running. `Err(NoMatch)` if nothing matched.
    pub fn dispatch(
        &self,
        state: &mut S,
        message: &Message,
    ) -> Result<bool, crate::error::RuntimeError> {
        let value = message.as_value();
        for rule in self.rules.iter().rev() {
            if matches(&rule.pattern, &value) {
                if let Some(handler) = &rule.handler {
                    handler(state, message);
                }
                return Ok(rule.keep_running);
            }
        }
        Err(crate::error::RuntimeError::NoMatch)
    }

    /// Receive messages for the current process and dispatch each one
    /// until a matched rule says to stop.
    pub fn run(&self, state: &mut S) -> ProcessResult {
        loop {
            let message = receive()?;
            if !self.dispatch(state, &message)? {
                return Ok(());
            }
        }
    }
}
