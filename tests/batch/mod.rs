//! Step definitions, fixtures and scenarios for `batch.feature`.

mod bdd_steps;
mod scenarios;
mod test_helpers;
