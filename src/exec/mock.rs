//! Scripted executor for tests
//!
//! Matches each command against registered argument prefixes. Outputs
//! registered for the same prefix are replayed in order and the last one
//! repeats. Unmatched commands succeed with empty output. Effects stand in
//! for files a real tool would have written.

use crate::domain::ports::{CommandExecutor, CommandLine, CommandOutput};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

struct Rule {
    prefix: Vec<String>,
    outputs: VecDeque<CommandOutput>,
}

type Effect = Box<dyn Fn(&[String]) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    effects: Mutex<Vec<(Vec<String>, Effect)>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an output for commands starting with `prefix`
    pub fn on(&self, prefix: &[&str], output: CommandOutput) {
        let prefix: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
        let mut rules = self.rules.lock();
        if let Some(rule) = rules.iter_mut().find(|r| r.prefix == prefix) {
            rule.outputs.push_back(output);
            return;
        }
        rules.push(Rule {
            prefix,
            outputs: VecDeque::from([output]),
        });
    }

    /// Run `effect` with the argv of every command starting with `prefix`
    pub fn on_effect<F>(&self, prefix: &[&str], effect: F)
    where
        F: Fn(&[String]) + Send + Sync + 'static,
    {
        let prefix = prefix.iter().map(|s| s.to_string()).collect();
        self.effects.lock().push((prefix, Box::new(effect)));
    }

    /// Every argument vector executed so far
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    /// Executed commands whose argv starts with `prefix`
    pub fn calls_matching(&self, prefix: &[&str]) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .iter()
            .filter(|argv| starts_with(argv, prefix))
            .cloned()
            .collect()
    }

    pub fn was_called(&self, prefix: &[&str]) -> bool {
        !self.calls_matching(prefix).is_empty()
    }
}

fn starts_with(argv: &[String], prefix: &[&str]) -> bool {
    argv.len() >= prefix.len() && argv.iter().zip(prefix).all(|(a, p)| a == p)
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, command: &CommandLine) -> Result<CommandOutput> {
        self.calls.lock().push(command.argv().to_vec());
        for (prefix, effect) in self.effects.lock().iter() {
            let prefix: Vec<&str> = prefix.iter().map(String::as_str).collect();
            if starts_with(command.argv(), &prefix) {
                effect(command.argv());
            }
        }

        let mut rules = self.rules.lock();
        // Longest matching prefix wins
        let rule = rules
            .iter_mut()
            .filter(|r| {
                let prefix: Vec<&str> = r.prefix.iter().map(String::as_str).collect();
                starts_with(command.argv(), &prefix)
            })
            .max_by_key(|r| r.prefix.len());

        Ok(match rule {
            Some(rule) if rule.outputs.len() > 1 => rule.outputs.pop_front().unwrap_or_default(),
            Some(rule) => rule.outputs.front().cloned().unwrap_or_default(),
            None => CommandOutput::ok(""),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
