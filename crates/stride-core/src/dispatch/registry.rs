//! Function registry: name -> executor table.
//!
//! Built once at startup and read-only afterward, so lookups are plain
//! `HashMap` gets with no synchronization. Dispatch is O(1) by name.

use std::collections::HashMap;

use stride_types::function::FunctionDefinition;

use super::executor::BoxFunctionExecutor;

/// Registry mapping function names to their executors.
pub struct FunctionRegistry {
    executors: HashMap<String, BoxFunctionExecutor>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor under its definition's name.
    ///
    /// Re-registering a name replaces the previous executor.
    pub fn register(&mut self, executor: BoxFunctionExecutor) {
        let name = executor.definition().name.clone();
        self.executors.insert(name, executor);
    }

    /// Look up an executor by function name.
    pub fn get(&self, name: &str) -> Option<&BoxFunctionExecutor> {
        self.executors.get(name)
    }

    /// Whether a function is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }

    /// All registered definitions, sorted by name for stable manifests.
    pub fn manifest(&self) -> Vec<&FunctionDefinition> {
        let mut definitions: Vec<&FunctionDefinition> =
            self.executors.values().map(|e| e.definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
