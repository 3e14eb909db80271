//! In-process store that keeps every saved revision for assertions

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{StoreError, SubmissionStore};
use crate::core::models::{Problem, Submission};
use crate::core::verdict::Phase;

#[derive(Default)]
pub struct MemoryStore {
    submissions: Mutex<HashMap<String, Submission>>,
    problems: Mutex<HashMap<String, Problem>>,
    history: Mutex<Vec<Submission>>,
    fail_saves: Mutex<bool>,
    failing_problem_loads: Mutex<u32>,
}

impl MemoryStore {
    pub fn insert_submission(&self, submission: Submission) {
        self.submissions
            .lock()
            .unwrap()
            .insert(submission.id.clone(), submission);
    }

    pub fn insert_problem(&self, problem: Problem) {
        self.problems
            .lock()
            .unwrap()
            .insert(problem.id.clone(), problem);
    }

    pub fn submission(&self, id: &str) -> Option<Submission> {
        self.submissions.lock().unwrap().get(id).cloned()
    }

    /// Every saved revision, in order
    pub fn history(&self) -> Vec<Submission> {
        self.history.lock().unwrap().clone()
    }

    /// Phases of every save, in order
    pub fn phases(&self, id: &str) -> Vec<Phase> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.id == id)
            .map(|s| s.status)
            .collect()
    }

    pub fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock().unwrap() = fail;
    }

    /// Make the next `count` problem loads fail
    pub fn fail_problem_loads(&self, count: u32) {
        *self.failing_problem_loads.lock().unwrap() = count;
    }
}

fn unavailable() -> StoreError {
    StoreError::Redis(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "store unavailable",
    )))
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn load_submission(&self, id: &str) -> Result<Option<Submission>, StoreError> {
        Ok(self.submission(id))
    }

    async fn load_problem(&self, id: &str) -> Result<Option<Problem>, StoreError> {
        {
            let mut failing = self.failing_problem_loads.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(unavailable());
            }
        }
        Ok(self.problems.lock().unwrap().get(id).cloned())
    }

    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        if *self.fail_saves.lock().unwrap() {
            return Err(unavailable());
        }
        self.history.lock().unwrap().push(submission.clone());
        self.insert_submission(submission.clone());
        Ok(())
    }
}
