pub mod google_analytics;
pub mod google_oauth;
pub mod google_sheets;
pub mod meta_ads;
