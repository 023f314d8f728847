//! cw-persist: the reference `PersistenceCollaborator`, an external,
//! serializable encoding of the core's editing entities (§4.9, §4.9.1).

mod error;
mod project;

pub use error::{PersistError, PersistResult};
pub use project::{
    dehydrate_composition, hydrate_composition, validate_hint_path, JsonProjectStore,
    PersistenceCollaborator, ProjectDocument, SegmentDocument, SourceRegistry, TrackDocument,
};
