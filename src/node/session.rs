//! Charging sessions and the charge request they are admitted from

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GridError;

/// Lower bound on a high-priority charge, in seconds
pub const HIGH_PRIORITY_FLOOR_SECS: f64 = 5.0;

/// Range the per-request duration jitter is drawn from
pub const JITTER_RANGE: std::ops::RangeInclusive<f64> = 0.8..=1.2;

/// Charge priority requested by the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            _ => None,
        }
    }

    /// Duration before jitter for a given base processing time
    pub fn tier_duration(self, base_secs: f64) -> f64 {
        match self {
            Priority::High => (base_secs * 0.7).max(HIGH_PRIORITY_FLOOR_SECS),
            Priority::Low => base_secs * 1.3,
            Priority::Normal => base_secs,
        }
    }
}

/// Final charge duration: tier duration scaled by jitter
pub fn charge_duration(priority: Priority, base_secs: f64, jitter: f64) -> f64 {
    priority.tier_duration(base_secs) * jitter
}

/// A validated charge request
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    pub vehicle_id: String,
    pub charge_amount: f64,
    pub priority: Priority,
}

impl ChargeRequest {
    pub fn new(vehicle_id: impl Into<String>, charge_amount: f64, priority: Priority) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            charge_amount,
            priority,
        }
    }

    /// Decode and validate a raw JSON body.
    /// Unknown fields are ignored; missing or malformed ones are `InvalidInput`.
    pub fn from_json(body: &Value) -> Result<Self, GridError> {
        let obj = body
            .as_object()
            .ok_or_else(|| GridError::InvalidInput("No data provided".to_string()))?;

        let field = |name: &str| {
            obj.get(name)
                .filter(|v| !v.is_null())
                .ok_or_else(|| GridError::InvalidInput(format!("Missing required field: {}", name)))
        };

        let vehicle_id = field("vehicle_id")?
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                GridError::InvalidInput("vehicle_id must be a non-empty string".to_string())
            })?
            .to_string();

        let charge_amount = match field("charge_amount")? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| GridError::InvalidInput("Invalid charge amount".to_string()))?;

        if !charge_amount.is_finite() || charge_amount <= 0.0 {
            return Err(GridError::InvalidInput(format!(
                "Invalid charge amount: {} (must be a finite positive number)",
                charge_amount
            )));
        }

        let priority = field("priority")?
            .as_str()
            .and_then(Priority::parse)
            .ok_or_else(|| {
                GridError::InvalidInput(
                    "priority must be one of \"low\", \"normal\", \"high\"".to_string(),
                )
            })?;

        Ok(Self {
            vehicle_id,
            charge_amount,
            priority,
        })
    }
}

/// An active charging session held by a node
#[derive(Debug, Clone, PartialEq)]
pub struct ChargingSession {
    pub session_id: String,
    pub vehicle_id: String,
    pub charge_amount: f64,
    pub priority: Priority,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: f64,
}

impl ChargingSession {
    pub fn new(
        session_id: String,
        request: &ChargeRequest,
        start_time: DateTime<Utc>,
        duration_secs: f64,
    ) -> Result<Self, GridError> {
        let end_time = start_time
            .checked_add_signed(TimeDelta::microseconds((duration_secs * 1e6).round() as i64))
            .ok_or_else(|| {
                GridError::Internal(format!(
                    "Session end time out of range for duration {}s",
                    duration_secs
                ))
            })?;
        Ok(Self {
            session_id,
            vehicle_id: request.vehicle_id.clone(),
            charge_amount: request.charge_amount,
            priority: request.priority,
            start_time,
            end_time,
            duration_secs,
        })
    }

    pub fn is_complete(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    /// Seconds left until completion, floored at zero
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> f64 {
        let remaining = (self.end_time - now).num_milliseconds() as f64 / 1e3;
        remaining.max(0.0)
    }
}
