mod archive;
mod config;
mod dedup;
mod error;
mod harvester;
mod queue;
mod record;
mod robots;
mod session;
mod shutdown;
mod site;
mod util;
mod walker;

pub use archive::{Archive, BlobStore, FsStore};
pub use config::CrawlConfig;
pub use dedup::Explored;
pub use error::{ConfigError, DownloadError, HarvestError, QueueError, StorageError};
pub use harvester::{pause_duration, HarvestSummary, Harvester};
pub use queue::{FsQueue, Lease, MemoryQueue, WorkQueue};
pub use record::{clean_number, FieldMap, FieldValue, PageParser, COLUMNS, GEO_COLUMNS, MISSING};
pub use robots::RobotsPolicy;
pub use session::{Connector, DirectConnector, Fetcher, Identity, IdentityManager, TorConnector};
pub use shutdown::Shutdown;
pub use site::{default_page_id, SiteSpec};
pub use util::cut_url;
pub use walker::{WalkOutcome, Walker};

pub use anyhow;
pub use select;
