//! Collections: named working trees of content moving through
//! in-progress, complete and reviewed towards publication.

mod artifacts;
mod collection;
mod description;
mod registry;

pub use artifacts::ARCHIVE_SUFFIX;
pub use collection::{Collection, CollectionContext, ContentReader, DESCRIPTION_FILE};
pub use description::{
    ApprovalStatus, ArchiveRecord, CollectionDescription, CollectionType, Event, EventType, PendingDelete, Stage,
};
pub use registry::{CollectionRegistry, SYSTEM_ACTOR};
