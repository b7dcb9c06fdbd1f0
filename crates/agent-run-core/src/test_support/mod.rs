//! Test doubles shared by unit and integration tests.

mod mock_intervention;

pub use mock_intervention::MockIntervention;
