//! Test doubles shared by the module tests

use crate::cluster::{CliTool, ClusterCli};
use crate::runner::CommandOutput;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// A [`ClusterCli`] that answers from a script and records every call.
///
/// Responses are keyed by the space-joined subcommand; a context-specific
/// response wins over a context-agnostic one, and a scripted sequence wins
/// over both. Unscripted calls fail.
pub struct ScriptedCli {
    tool: CliTool,
    responses: HashMap<(Option<String>, String), CommandOutput>,
    sequences: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    calls: Mutex<Vec<(Option<String>, String)>>,
}

impl ScriptedCli {
    pub fn new(tool: CliTool) -> Self {
        Self {
            tool,
            responses: HashMap::new(),
            sequences: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(mut self, args: &str, output: CommandOutput) -> Self {
        self.responses.insert((None, args.to_string()), output);
        self
    }

    pub fn respond_for(mut self, context: &str, args: &str, output: CommandOutput) -> Self {
        self.responses
            .insert((Some(context.to_string()), args.to_string()), output);
        self
    }

    /// Answer successive calls in order; the last output repeats
    pub fn respond_sequence(self, args: &str, outputs: Vec<CommandOutput>) -> Self {
        self.sequences
            .lock()
            .unwrap()
            .insert(args.to_string(), outputs.into());
        self
    }

    pub fn calls(&self) -> Vec<(Option<String>, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls whose subcommand contains `needle`
    pub fn count_calls(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, args)| args.contains(needle))
            .count()
    }
}

#[async_trait]
impl ClusterCli for ScriptedCli {
    fn tool(&self) -> CliTool {
        self.tool
    }

    async fn run(&self, context: Option<&str>, args: &[&str]) -> CommandOutput {
        let key = args.join(" ");
        let context = context.map(str::to_string);
        self.calls.lock().unwrap().push((context.clone(), key.clone()));

        if let Some(queue) = self.sequences.lock().unwrap().get_mut(&key) {
            let next = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
            if let Some(output) = next {
                return output;
            }
        }

        self.responses
            .get(&(context, key.clone()))
            .or_else(|| self.responses.get(&(None, key.clone())))
            .cloned()
            .unwrap_or_else(|| CommandOutput::failed(format!("no scripted response for '{}'", key)))
    }
}
