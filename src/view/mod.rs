//! View gateway
//!
//! Queries precomputed map/reduce indexes and provisions their definitions.

mod types;

pub use crate::store::QueryOptions;
pub use types::{DesignDoc, ViewDefinition, ViewResult, ViewRow};

use reqwest::Method;
use url::Url;

use crate::error::Result;
use crate::store::Database;

impl Database {
    fn view_url(&self, design: &str, view: &str) -> Url {
        self.endpoint(&["_design", design, "_view", view])
    }

    /// Whether `_design/{design}/_view/{view}` exists
    pub async fn has_view(&self, design: &str, view: &str) -> Result<bool> {
        self.server()
            .head(&self.view_url(design, view), self.credentials())
            .await
    }

    pub async fn query(
        &self,
        design: &str,
        view: &str,
        options: &QueryOptions,
    ) -> Result<ViewResult> {
        let mut url = self.view_url(design, view);
        options.apply(&mut url);
        self.execute(Method::GET, url, None).await?.json()
    }

    /// Store a view definition, adding it to the design document if one
    /// already exists
    pub async fn create_view(
        &self,
        design: &str,
        view: &str,
        definition: ViewDefinition,
    ) -> Result<()> {
        let id = format!("_design/{design}");
        let mut doc = match self.retrieve::<DesignDoc>(&id).await {
            Ok(doc) => doc,
            Err(err) if err.is_not_found() => DesignDoc::new(design),
            Err(err) => return Err(err),
        };

        doc.views.insert(view.to_string(), definition);
        self.insert(&mut doc).await?;

        tracing::info!(db = %self.name(), design = %design, view = %view, "Created view");
        Ok(())
    }
}
