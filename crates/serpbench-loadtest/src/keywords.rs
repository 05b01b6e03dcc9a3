//! Keyword pools

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordOrder {
    /// `terms[seq % len]`
    #[default]
    RoundRobin,
    /// Uniform random choice per request
    Random,
}

/// Search terms substituted into request templates.
///
/// Shared read-only by every worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordPool {
    pub terms: Vec<String>,
    #[serde(default)]
    pub order: KeywordOrder,
}

impl KeywordPool {
    pub fn new<I, T>(terms: I, order: KeywordOrder) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            terms: terms.into_iter().map(Into::into).collect(),
            order,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.terms.is_empty() {
            return Err(BenchError::config("keyword pool has no terms"));
        }
        Ok(())
    }

    /// Keyword for dispatch `seq`; empty string for an empty pool
    pub fn pick(&self, seq: u64) -> &str {
        if self.terms.is_empty() {
            return "";
        }
        match self.order {
            KeywordOrder::RoundRobin => &self.terms[(seq % self.terms.len() as u64) as usize],
            KeywordOrder::Random => self
                .terms
                .choose(&mut rand::thread_rng())
                .map(String::as_str)
                .unwrap_or_default(),
        }
    }
}
