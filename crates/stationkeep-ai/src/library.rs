//! Resolved task library
//!
//! Authored [`TaskDef`]s reference subtasks by name. Resolution turns
//! every reference into a [`TaskRef`] index so plan search never does a
//! string lookup, and catches authoring mistakes (duplicate names,
//! dangling references, an empty domain) up front.

use std::collections::HashMap;
use std::fmt;

use crate::operators::OperatorSpec;
use crate::tasks::{Effect, Precondition, Service, TaskDef};

/// Index into a [`TaskLibrary`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRef {
    Compound(usize),
    Primitive(usize),
}

/// Resolved compound task
#[derive(Debug, Clone)]
pub struct CompoundTask {
    pub name: String,
    pub methods: Vec<Method>,
}

/// Resolved decomposition: preconditions plus ordered subtask indices
#[derive(Debug, Clone)]
pub struct Method {
    pub preconditions: Vec<Precondition>,
    pub subtasks: Vec<TaskRef>,
}

/// Resolved primitive task
#[derive(Debug, Clone)]
pub struct PrimitiveTask {
    pub name: String,
    pub preconditions: Vec<Precondition>,
    pub operator: OperatorSpec,
    pub effects: Vec<Effect>,
    pub apply_effects_on_startup: bool,
    pub services: Vec<Service>,
}

#[derive(Debug)]
pub enum LibraryError {
    Parse(serde_json::Error),
    EmptyLibrary,
    DuplicateTask(String),
    UnknownTask { task: String, referenced_by: String },
}

impl From<serde_json::Error> for LibraryError {
    fn from(err: serde_json::Error) -> Self {
        LibraryError::Parse(err)
    }
}

impl fmt::Display for LibraryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryError::Parse(err) => write!(f, "failed to parse task library: {}", err),
            LibraryError::EmptyLibrary => write!(f, "task library contains no tasks"),
            LibraryError::DuplicateTask(name) => write!(f, "duplicate task name: {}", name),
            LibraryError::UnknownTask {
                task,
                referenced_by,
            } => write!(f, "task {} references unknown task {}", referenced_by, task),
        }
    }
}

impl std::error::Error for LibraryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LibraryError::Parse(err) => Some(err),
            _ => None,
        }
    }
}

/// Immutable, fully resolved planning domain
///
/// Shared across agents behind an `Arc`; building one is a load-time
/// operation, never a per-tick one.
#[derive(Debug, Clone, Default)]
pub struct TaskLibrary {
    compounds: Vec<CompoundTask>,
    primitives: Vec<PrimitiveTask>,
    by_name: HashMap<String, TaskRef>,
}

impl TaskLibrary {
    pub fn from_defs(defs: Vec<TaskDef>) -> Result<Self, LibraryError> {
        if defs.is_empty() {
            return Err(LibraryError::EmptyLibrary);
        }

        let mut library = TaskLibrary::default();

        // Pass 1: assign indices so forward references resolve
        for def in &defs {
            let task_ref = match def {
                TaskDef::Compound { .. } => TaskRef::Compound(library.compounds.len()),
                TaskDef::Primitive { .. } => TaskRef::Primitive(library.primitives.len()),
            };
            if library
                .by_name
                .insert(def.name().to_string(), task_ref)
                .is_some()
            {
                return Err(LibraryError::DuplicateTask(def.name().to_string()));
            }
            match def {
                TaskDef::Compound { name, .. } => library.compounds.push(CompoundTask {
                    name: name.clone(),
                    methods: Vec::new(),
                }),
                TaskDef::Primitive {
                    name,
                    preconditions,
                    operator,
                    effects,
                    apply_effects_on_startup,
                    services,
                } => library.primitives.push(PrimitiveTask {
                    name: name.clone(),
                    preconditions: preconditions.clone(),
                    operator: operator.clone(),
                    effects: effects.clone(),
                    apply_effects_on_startup: *apply_effects_on_startup,
                    services: services.clone(),
                }),
            }
        }

        // Pass 2: resolve method subtask names
        let mut compound_index = 0;
        for def in &defs {
            if let TaskDef::Compound { name, methods } = def {
                let mut resolved = Vec::with_capacity(methods.len());
                for method in methods {
                    resolved.push(Method {
                        preconditions: method.preconditions.clone(),
                        subtasks: library.resolve_names(&method.subtasks, name)?,
                    });
                }
                library.compounds[compound_index].methods = resolved;
                compound_index += 1;
            }
        }

        Ok(library)
    }

    pub fn from_json(text: &str) -> Result<Self, LibraryError> {
        let defs: Vec<TaskDef> = serde_json::from_str(text)?;
        Self::from_defs(defs)
    }

    fn resolve_names(&self, names: &[String], owner: &str) -> Result<Vec<TaskRef>, LibraryError> {
        names
            .iter()
            .map(|name| {
                self.by_name
                    .get(name)
                    .copied()
                    .ok_or_else(|| LibraryError::UnknownTask {
                        task: name.clone(),
                        referenced_by: owner.to_string(),
                    })
            })
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<TaskRef> {
        self.by_name.get(name).copied()
    }

    pub fn compound(&self, index: usize) -> &CompoundTask {
        &self.compounds[index]
    }

    pub fn primitive(&self, index: usize) -> &PrimitiveTask {
        &self.primitives[index]
    }

    pub fn compound_count(&self) -> usize {
        self.compounds.len()
    }

    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
    }

    /// Renders the decomposition tree under `root` as indented text,
    /// for debug output and domain inspection tooling
    pub fn domain_text(&self, root: &str) -> String {
        let mut out = String::new();
        match self.find(root) {
            Some(task_ref) => {
                let mut visiting = Vec::new();
                self.render(task_ref, 0, &mut visiting, &mut out);
            }
            None => out.push_str(&format!("(unknown task: {})\n", root)),
        }
        out
    }

    fn render(&self, task_ref: TaskRef, depth: usize, visiting: &mut Vec<TaskRef>, out: &mut String) {
        let pad = "  ".repeat(depth);
        match task_ref {
            TaskRef::Primitive(index) => {
                let task = &self.primitives[index];
                out.push_str(&format!("{}- {} [{}]\n", pad, task.name, task.operator.kind()));
            }
            TaskRef::Compound(index) => {
                let task = &self.compounds[index];
                if visiting.contains(&task_ref) {
                    out.push_str(&format!("{}* {} (recursive)\n", pad, task.name));
                    return;
                }
                out.push_str(&format!("{}* {}\n", pad, task.name));
                visiting.push(task_ref);
                for (m, method) in task.methods.iter().enumerate() {
                    if method.preconditions.is_empty() {
                        out.push_str(&format!("{}  method {}:\n", pad, m));
                    } else {
                        out.push_str(&format!(
                            "{}  method {} (preconditions: {}):\n",
                            pad,
                            m,
                            method.preconditions.len()
                        ));
                    }
                    for subtask in &method.subtasks {
                        self.render(*subtask, depth + 2, visiting, out);
                    }
                }
                visiting.pop();
            }
        }
    }
}
