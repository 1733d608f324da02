use anyhow::Result;
use tracing::{debug, error};

use crate::{StateFile, StateStore};

/// One atomic mutating operation against the persisted state.
pub trait Workflow {
    fn name(&self) -> &'static str;

    fn execute(&self, state: &mut StateFile) -> Result<()>;
}

/// Runs workflows one at a time and commits the state store after every run,
/// whether the workflow succeeded or not.
#[derive(Debug)]
pub struct WorkflowEngine {
    store: StateStore,
}

impl WorkflowEngine {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn state(&self) -> &StateFile {
        self.store.state()
    }

    /// Returns the workflow's own error, if any. A failed commit is logged and
    /// only surfaces when the workflow itself succeeded.
    pub fn execute(&mut self, workflow: &dyn Workflow) -> Result<()> {
        let mut scope = CommitScope {
            store: &mut self.store,
            workflow: workflow.name(),
            committed: false,
        };
        debug!(workflow = workflow.name(), "executing workflow");
        let result = workflow.execute(scope.store.state_mut());
        let committed = scope.commit();

        match (result, committed) {
            (Err(err), _) => Err(err),
            (Ok(()), Err(err)) => Err(err),
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}

/// Commits on every exit path, including unwinding out of a workflow.
struct CommitScope<'a> {
    store: &'a mut StateStore,
    workflow: &'static str,
    committed: bool,
}

impl CommitScope<'_> {
    fn commit(&mut self) -> Result<()> {
        let result = self.store.commit();
        if let Err(err) = &result {
            error!(workflow = self.workflow, "failed to commit the state file: {err:#}");
        }
        self.committed = true;
        result
    }
}

impl Drop for CommitScope<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let _ = self.commit();
        }
    }
}
