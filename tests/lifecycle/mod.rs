//! Step definitions, fixtures and scenarios for `lifecycle.feature`.

mod bdd_steps;
mod scenarios;
mod test_helpers;
