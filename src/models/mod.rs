pub mod action_plan;
pub mod company;
pub mod monthly_stats;
pub mod observation;
pub mod profile;
pub mod project;
pub mod report_listing;
pub mod safety_category;
