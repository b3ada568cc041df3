//! Invalidation cascade: the static rule table and the planner evaluating it.

mod planner;
mod rules;

pub use planner::{CascadePlan, WrittenEntity, on_write_succeeded};
pub use rules::{
    CASCADE_RULES, CascadeRule, CascadeTarget, FilterField, Subject, describe, rule_for,
};
