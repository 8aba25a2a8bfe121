//! Cluster lifecycle behaviour tests.

mod bdd_steps;
mod scenarios;
mod test_helpers;
