//! In-memory store and agent doubles shared by the unit tests

use crate::agent::{Agent, Generation, Usage};
use crate::errors::{Error, Result};
use crate::model::{ColumnInfo, Datum, QueryResponse, Row};
use crate::query::FormattedQuery;
use crate::store::TimeSeriesStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct MockStore {
    responses: Mutex<VecDeque<Result<QueryResponse>>>,
    queries: Mutex<Vec<FormattedQuery>>,
    calls: AtomicUsize,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            queries: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn returning(response: QueryResponse) -> Self {
        let store = Self::new();
        store.push_ok(response);
        store
    }

    pub fn failing(message: &str) -> Self {
        let store = Self::new();
        store.push_err(message);
        store
    }

    pub fn push_ok(&self, response: QueryResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_err(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(Error::Validation(message.to_string())));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_query(&self) -> Option<FormattedQuery> {
        self.queries.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TimeSeriesStore for MockStore {
    async fn execute(&self, query: &FormattedQuery) -> Result<QueryResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(QueryResponse::default()))
    }
}

pub struct MockAgent {
    name: String,
    reply: Option<String>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl MockAgent {
    pub fn replying(name: &str, reply: &str) -> Self {
        Self {
            name: name.to_string(),
            reply: Some(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reply: None,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.reply {
            Some(text) => Ok(Generation {
                text: text.clone(),
                finish_reason: Some("stop".to_string()),
                usage: Some(Usage {
                    prompt_tokens: 100,
                    completion_tokens: 20,
                    total_tokens: 120,
                }),
            }),
            None => Err(Error::Agent("upstream returned HTTP 503".to_string())),
        }
    }
}

pub const RAW_COLUMNS: [&str; 5] = [
    "deviceid",
    "time",
    "measure_name",
    "measure_value::double",
    "measure_value::bigint",
];

/// A raw-projection response with alternating temperature and humidity rows,
/// newest first, one minute apart starting at `newest`
pub fn raw_response(count: usize, newest: DateTime<Utc>) -> QueryResponse {
    let rows = (0..count)
        .map(|i| {
            let time = (newest - Duration::minutes(i as i64))
                .to_rfc3339_opts(SecondsFormat::Secs, true);
            let (name, double, bigint) = if i % 2 == 0 {
                ("temperature", Some(format!("{:.2}", 24.3 - i as f64 * 0.1)), None)
            } else {
                ("humidity", None, Some(format!("{}", 61 + i)))
            };
            Row {
                data: vec![
                    Datum {
                        scalar_value: Some("esp32-thing".to_string()),
                    },
                    Datum {
                        scalar_value: Some(time),
                    },
                    Datum {
                        scalar_value: Some(name.to_string()),
                    },
                    Datum {
                        scalar_value: double,
                    },
                    Datum {
                        scalar_value: bigint,
                    },
                ],
            }
        })
        .collect();

    QueryResponse {
        column_info: RAW_COLUMNS
            .iter()
            .map(|n| ColumnInfo {
                name: n.to_string(),
            })
            .collect(),
        rows,
    }
}
