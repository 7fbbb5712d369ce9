pub mod authors;
pub mod books;
pub mod categories;
pub mod notifications;
pub mod readers;
pub mod system;
pub mod uploads;
pub mod users;

pub use authors::*;
pub use books::*;
pub use categories::*;
pub use notifications::*;
pub use readers::*;
pub use system::*;
pub use uploads::*;
pub use users::*;

use crate::auth::mfa::MfaService;
use crate::auth::session::SessionStore;
use crate::auth::AuthSettings;
use crate::core::config::Config;
use crate::core::mailer::Mailer;
use crate::core::notifications::NotificationHub;
use crate::core::services::CatalogService;
use crate::core::storage::UploadStore;
use crate::db::repository::{
    AuthorRepository, BookImageRepository, BookRepository, CategoryRepository,
    MfaChallengeRepository, ReaderRepository, UserRepository,
};
use crate::db::DatabaseManager;
use std::sync::Arc;

/// Shared application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseManager>,
    pub category_repo: Arc<CategoryRepository>,
    pub author_repo: Arc<AuthorRepository>,
    pub book_repo: Arc<BookRepository>,
    pub image_repo: Arc<BookImageRepository>,
    pub user_repo: Arc<UserRepository>,
    pub reader_repo: Arc<ReaderRepository>,
    pub catalog: Arc<CatalogService>,
    pub sessions: Arc<dyn SessionStore>,
    pub mfa: Arc<MfaService>,
    pub mailer: Arc<dyn Mailer>,
    pub notifications: Arc<NotificationHub>,
    pub uploads: Arc<UploadStore>,
    pub auth: Arc<AuthSettings>,
}

impl AppState {
    /// Wire repositories and services over one database
    pub fn new(
        config: &Config,
        db: Arc<DatabaseManager>,
        sessions: Arc<dyn SessionStore>,
        mailer: Arc<dyn Mailer>,
        notifications: Arc<NotificationHub>,
    ) -> Self {
        let category_repo = Arc::new(CategoryRepository::new(db.clone()));
        let author_repo = Arc::new(AuthorRepository::new(db.clone()));
        let book_repo = Arc::new(BookRepository::new(db.clone()));
        let image_repo = Arc::new(BookImageRepository::new(db.clone()));
        let user_repo = Arc::new(UserRepository::new(db.clone()));
        let reader_repo = Arc::new(ReaderRepository::new(db.clone()));

        let uploads = Arc::new(UploadStore::new(
            config.storage.upload_dir.clone(),
            config.storage.max_upload_size as u64,
        ));

        let catalog = Arc::new(CatalogService::new(
            category_repo.clone(),
            author_repo.clone(),
            book_repo.clone(),
            image_repo.clone(),
            uploads.clone(),
            notifications.clone(),
        ));

        let mfa = Arc::new(MfaService::new(
            Arc::new(MfaChallengeRepository::new(db.clone())),
            config.security.mfa_code_ttl,
            config.security.mfa_max_attempts,
        ));

        Self {
            db,
            category_repo,
            author_repo,
            book_repo,
            image_repo,
            user_repo,
            reader_repo,
            catalog,
            sessions,
            mfa,
            mailer,
            notifications,
            uploads,
            auth: Arc::new(AuthSettings::from(&config.security)),
        }
    }
}
