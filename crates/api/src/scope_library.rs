//! OAuth scope enrichment from the local `oauth_scope_library` table.
//!
//! The details endpoint resolves each scope string an automation holds into
//! a human-readable description and risk classification, plus an aggregate
//! `overall_risk` (the maximum scope risk).

use serde::Serialize;
use singura_core::{DatabasePool, Result, RiskLevel};
use sqlx::Row;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize)]
pub struct ScopeDetails {
    pub scope: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    pub description: String,
    #[serde(rename = "riskLevel")]
    pub risk_level: RiskLevel,
    #[serde(rename = "dataTypes")]
    pub data_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScopeAnalysis {
    pub scopes: Vec<ScopeDetails>,
    #[serde(rename = "overallRisk")]
    pub overall_risk: RiskLevel,
}

pub struct ScopeLibrary {
    db: DatabasePool,
}

impl ScopeLibrary {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    /// Resolve a permission list against the library. Unknown scopes are
    /// returned with a generic entry at medium risk rather than dropped,
    /// so reviewers see everything the automation holds.
    pub async fn enrich(&self, scopes: &[String]) -> Result<ScopeAnalysis> {
        if scopes.is_empty() {
            return Ok(ScopeAnalysis {
                scopes: Vec::new(),
                overall_risk: RiskLevel::Low,
            });
        }

        let rows = sqlx::query(
            r#"
            SELECT scope, display_name, description, risk_level, data_types
            FROM oauth_scope_library
            WHERE scope = ANY($1)
            "#,
        )
        .bind(scopes)
        .fetch_all(self.db.get())
        .await?;

        let mut known: std::collections::HashMap<String, ScopeDetails> =
            std::collections::HashMap::new();
        for row in rows {
            let scope: String = row.get("scope");
            known.insert(
                scope.clone(),
                ScopeDetails {
                    scope,
                    display_name: row.get("display_name"),
                    description: row.get("description"),
                    risk_level: RiskLevel::from_str(&row.get::<String, _>("risk_level"))?,
                    data_types: row.get("data_types"),
                },
            );
        }

        let mut details = Vec::with_capacity(scopes.len());
        for scope in scopes {
            match known.remove(scope) {
                Some(entry) => details.push(entry),
                None => details.push(ScopeDetails {
                    scope: scope.clone(),
                    display_name: scope.clone(),
                    description: "Scope not present in the library.".to_string(),
                    risk_level: RiskLevel::Medium,
                    data_types: Vec::new(),
                }),
            }
        }

        let overall_risk = details
            .iter()
            .map(|d| d.risk_level)
            .max()
            .unwrap_or(RiskLevel::Low);

        Ok(ScopeAnalysis {
            scopes: details,
            overall_risk,
        })
    }
}
