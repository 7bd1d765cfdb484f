//! The console command registry `Engine.cpp` wires up alongside its
//! asset and rendering subsystems. Commands receive the façade itself so
//! they can report on live state (the built-in `vmem` command reads the
//! root arena and the device's memory-budget query) without the façade
//! needing to pre-capture anything into a closure.

use crate::engine::Engine;
use parking_lot::Mutex;

pub trait ConsoleCommand: Send + Sync {
    fn name(&self) -> &str;
    fn execute(&self, engine: &Engine, args: &[&str]) -> String;
}

#[derive(Default)]
pub struct ConsoleRegistry {
    commands: Mutex<Vec<Box<dyn ConsoleCommand>>>,
}

impl ConsoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, command: Box<dyn ConsoleCommand>) {
        self.commands.lock().push(command);
    }

    pub fn execute(&self, engine: &Engine, name: &str, args: &[&str]) -> Option<String> {
        self.commands.lock().iter().find(|c| c.name() == name).map(|c| c.execute(engine, args))
    }

    pub fn command_names(&self) -> Vec<String> {
        self.commands.lock().iter().map(|c| c.name().to_string()).collect()
    }
}

/// Reports the root arena's reserved/committed sizes and, when the
/// device exposes `VK_EXT_memory_budget`, the GPU heap budget.
pub struct VmemCommand;

impl ConsoleCommand for VmemCommand {
    fn name(&self) -> &str {
        "vmem"
    }

    fn execute(&self, engine: &Engine, _args: &[&str]) -> String {
        let reserved = engine.root_arena_reserve_size();
        let committed = engine.root_arena().committed_size();
        let mut out = format!("root arena: {committed}/{reserved} bytes committed");
        match engine.device().query_memory_budget() {
            Some(budget) => {
                out.push_str(&format!(
                    "\nheap budget: {}/{} bytes",
                    budget.heap_usage_bytes, budget.heap_budget_bytes
                ));
            }
            None => out.push_str("\nheap budget: VK_EXT_memory_budget not supported"),
        }
        out
    }
}
