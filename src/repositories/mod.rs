pub mod generated;
pub mod jobs;
pub mod pages;
pub mod schedules;
pub mod sites;

pub use generated::GeneratedFileRepository;
pub use jobs::CrawlJobRepository;
pub use pages::{NewPage, PageRepository};
pub use schedules::{ScheduleRepository, ScheduleUpsert};
pub use sites::SiteRepository;
