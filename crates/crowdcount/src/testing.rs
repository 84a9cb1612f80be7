//! In-process gateway double for tests
//!
//! Replies are matched by substring against the statement SQL. Each rule
//! holds a queue of replies; the last reply repeats once the queue drains.

use crate::error::CrowdError;
use crate::gateway::{QueryGateway, Statement};
use crate::snapshot::{Column, ResultSet};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

type Reply = Result<ResultSet, String>;

struct Rule {
    needle: String,
    replies: VecDeque<Reply>,
}

/// Scripted [`QueryGateway`] that records every statement it sees
#[derive(Default)]
pub struct ScriptedGateway {
    rules: Mutex<Vec<Rule>>,
    log: Mutex<Vec<Statement>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer statements containing `needle` with `result`
    pub fn on(&self, needle: &str, result: ResultSet) -> &Self {
        self.on_sequence(needle, vec![Ok(result)])
    }

    /// Fail statements containing `needle`
    pub fn fail(&self, needle: &str, message: &str) -> &Self {
        self.on_sequence(needle, vec![Err(message.to_string())])
    }

    /// Answer successive matching statements from `replies`
    pub fn on_sequence(&self, needle: &str, replies: Vec<Reply>) -> &Self {
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        rules.retain(|r| r.needle != needle);
        rules.push(Rule {
            needle: needle.to_string(),
            replies: replies.into(),
        });
        self
    }

    /// Every statement executed so far
    pub fn statements(&self) -> Vec<Statement> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of executed statements containing `needle`
    pub fn count(&self, needle: &str) -> usize {
        self.statements()
            .iter()
            .filter(|s| s.sql.contains(needle))
            .count()
    }
}

#[async_trait]
impl QueryGateway for ScriptedGateway {
    async fn execute(&self, statement: &Statement) -> Result<ResultSet, CrowdError> {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(statement.clone());

        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        let Some(rule) = rules.iter_mut().find(|r| statement.sql.contains(&r.needle)) else {
            return Ok(ResultSet::default());
        };
        let reply = if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().cloned()
        };
        match reply {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(CrowdError::Api {
                status: 500,
                code: "000000".to_string(),
                message,
            }),
            None => Ok(ResultSet::default()),
        }
    }
}

/// Single-column result set of strings
pub fn single_column(name: &str, values: &[&str]) -> ResultSet {
    ResultSet::new(
        vec![Column::new(name, "text")],
        values
            .iter()
            .map(|v| vec![Value::String((*v).to_string())])
            .collect(),
    )
}
