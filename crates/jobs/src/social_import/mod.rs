//! Social-media wardrobe import: authenticate, process photos, review.

pub mod api;
pub mod model;
pub mod orchestrator;
pub mod reducer;

pub use api::{Credentials, OAuthGrant, PhotoItemPatch, SocialImportApi, StartSocialImport};
pub use model::{
    ReviewItem, ReviewPhoto, SocialImportJob, SocialImportSnapshot, SocialImportStatus,
    SocialPlatform,
};
pub use orchestrator::SocialImportOrchestrator;
pub use reducer::SocialImportEvent;
