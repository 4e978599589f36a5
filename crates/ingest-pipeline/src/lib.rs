pub mod discovery;
pub mod market_hours;
pub mod planner;
pub mod validator;

pub use discovery::discover;
pub use market_hours::{should_run, GateDecision, HolidayCalendar, NyseCalendar};
pub use planner::{build_plan, Plan, PlanEntry, PlanTarget, SkippedEntry};
pub use validator::{validate, validate_and_exclude};
