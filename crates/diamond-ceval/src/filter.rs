//! A filter chain compiled from a declarative spec into an ordered,
//! executable plan — the same "compile a declarative set into an
//! executable structure" shape as `filter_compiler::compile_filters`,
//! generalized here with an explicit dependency graph and topological
//! sort instead of a fixed field-by-field compilation.

use std::collections::{HashMap, HashSet, VecDeque};

use diamond_contracts::odisk::{ObjectDisk, ObjectId};
use diamond_core::Sig128;

use crate::error::{CevalError, CevalResult};

/// One filter's declared identity and execution parameters.
#[derive(Debug, Clone)]
pub struct FilterSpec {
    pub name: String,
    pub sig: Sig128,
    pub threshold: i32,
    /// Names of other filters in the same chain that must run first.
    pub deps: Vec<String>,
    pub args: Vec<String>,
    pub blob: Option<Vec<u8>>,
}

/// Outcome of running a filter's body against one object.
pub struct FilterRunOutcome {
    pub result: i32,
    /// Output attributes the filter computed and wants materialized back
    /// onto the object.
    pub oattrs: Vec<(String, Vec<u8>)>,
}

/// The executable body of one filter. `name`/`sig`/`threshold` identify
/// it for caching and ordering purposes; `run` does the actual work.
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;
    fn sig(&self) -> Sig128;
    fn threshold(&self) -> i32;

    /// Attribute names this filter reads as input, used to build the
    /// input-attribute snapshot consulted against the cache.
    fn declared_reads(&self) -> &[String];

    /// Execute the filter body against `obj` via `disk`.
    ///
    /// # Errors
    /// Returns an error if reading required attributes from `disk`
    /// fails in an unrecoverable way.
    fn run(&self, disk: &dyn ObjectDisk, obj: ObjectId) -> CevalResult<FilterRunOutcome>;
}

/// An ordered, dependency-resolved sequence of filters: executed in the
/// declared order, topologically sorted by `deps` beforehand.
///
/// Cloning is cheap (an `Arc` bump per filter), so a pipeline with several
/// evaluator threads can hand each of them an independent handle onto the
/// same compiled chain.
#[derive(Clone)]
pub struct FilterChain {
    filters: Vec<std::sync::Arc<dyn Filter>>,
}

impl FilterChain {
    /// Build a chain from specs paired with their executable bodies,
    /// sorted so every filter follows all of its declared dependencies.
    /// Ties among filters with no remaining dependency break in the
    /// specs' original declared order (a stable topological sort).
    ///
    /// # Errors
    /// Returns [`CevalError::UnknownDependency`] if a `deps` entry names
    /// a filter not present in `filters`, or
    /// [`CevalError::DependencyCycle`] if the dependency graph has a
    /// cycle.
    pub fn compile(
        specs: Vec<FilterSpec>,
        bodies: Vec<std::sync::Arc<dyn Filter>>,
    ) -> CevalResult<Self> {
        let names_by_index: HashMap<&str, usize> = specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();

        for spec in &specs {
            for dep in &spec.deps {
                if !names_by_index.contains_key(dep.as_str()) {
                    return Err(CevalError::UnknownDependency(spec.name.clone(), dep.clone()));
                }
            }
        }

        let n = specs.len();
        let mut indegree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, spec) in specs.iter().enumerate() {
            for dep in &spec.deps {
                let dep_idx = names_by_index[dep.as_str()];
                dependents[dep_idx].push(i);
                indegree[i] += 1;
            }
        }

        // Stable Kahn's algorithm: always pick the lowest-index ready
        // node so chains with no dependencies preserve declared order.
        let mut ready: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        let mut seen = HashSet::with_capacity(n);
        while let Some(idx) = pop_lowest(&mut ready) {
            if !seen.insert(idx) {
                continue;
            }
            order.push(idx);
            for &dep_idx in &dependents[idx] {
                indegree[dep_idx] -= 1;
                if indegree[dep_idx] == 0 {
                    ready.push_back(dep_idx);
                }
            }
        }

        if order.len() != n {
            let stuck: Vec<String> = (0..n)
                .filter(|i| !seen.contains(i))
                .map(|i| specs[i].name.clone())
                .collect();
            return Err(CevalError::DependencyCycle(stuck));
        }

        let bodies_by_name: HashMap<&str, std::sync::Arc<dyn Filter>> = bodies
            .iter()
            .map(|f| (f.name(), std::sync::Arc::clone(f)))
            .collect();
        let filters = order
            .into_iter()
            .map(|i| std::sync::Arc::clone(&bodies_by_name[specs[i].name.as_str()]))
            .collect();

        Ok(Self { filters })
    }

    #[must_use]
    pub fn filters(&self) -> &[std::sync::Arc<dyn Filter>] {
        &self.filters
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

fn pop_lowest(ready: &mut VecDeque<usize>) -> Option<usize> {
    if ready.is_empty() {
        return None;
    }
    let (pos, _) = ready.iter().enumerate().min_by_key(|(_, &v)| v)?;
    ready.remove(pos)
}
