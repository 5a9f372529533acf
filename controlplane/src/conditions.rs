/*
Copyright 2025 The Kubernetes Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Readiness conditions kept as an ordered list, unique by type.

use std::fmt;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;

pub use crate::traits::HasConditions;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

// Builds a condition stamped with the current time.
pub fn new_condition(
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
    observed_generation: Option<i64>,
) -> metav1::Condition {
    metav1::Condition {
        type_: type_.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message: message.into(),
        observed_generation,
        last_transition_time: metav1::Time(Utc::now()),
    }
}

// Sets the provided condition on any object implementing HasConditions, inserting it
// at the end if its type is new and updating it in place otherwise.
//
// The last transition time is only taken from the new condition when the status
// changes. Reason, message and observed generation are always updated.
//
// Returns true if the status transitioned.
pub fn set_condition<T: HasConditions>(obj: &mut T, new_cond: metav1::Condition) -> bool {
    let conditions = obj.get_conditions_mut();
    for condition in conditions.iter_mut() {
        if condition.type_ == new_cond.type_ {
            if condition.status == new_cond.status {
                condition.reason = new_cond.reason;
                condition.message = new_cond.message;
                condition.observed_generation = new_cond.observed_generation;
                return false;
            }
            *condition = new_cond;
            return true;
        }
    }
    conditions.push(new_cond);
    true
}

// Inserts the condition only if no condition of its type exists yet.
pub fn init_condition<T: HasConditions>(obj: &mut T, new_cond: metav1::Condition) {
    let conditions = obj.get_conditions_mut();
    if !conditions.iter().any(|c| c.type_ == new_cond.type_) {
        conditions.push(new_cond);
    }
}

pub fn find_condition<'a>(
    conditions: &'a [metav1::Condition],
    type_: &str,
) -> Option<&'a metav1::Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_condition_true(conditions: &[metav1::Condition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True.as_str())
}
