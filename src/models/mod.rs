//! Model weights: the voice model catalog, user-imported models, and the required
//! baseline and stem separation files.

pub mod catalog;
pub mod download;
pub mod registry;
pub mod required;
pub mod weights;

pub use catalog::{
    ArtistModelOption, ExtensionMetadata, HubTreeEntry, MetaValue, ModelMetadata, VoiceModelWeight,
};
pub use download::format_bytes;
pub use registry::{StemmingModel, Weight};
pub use required::{FileCounts, RequiredAssetDownloader, StemStatus};
pub use weights::WeightRegistry;
