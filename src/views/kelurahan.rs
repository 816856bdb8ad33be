use serde_json::{Map, Value};
use tracing::info;

use super::ViewContext;
use crate::error::{AppError, AppResult, STORE_DECODE};
use crate::model::{Kelurahan, RecordId, KELURAHAN};
use crate::reconcile::{self, Confirmation};
use crate::validate;

/// Reference list editor. Every write patches the local list in place.
pub struct KelurahanView {
    ctx: ViewContext,
    list: Vec<Kelurahan>,
}

fn name_payload(name: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("name".into(), Value::String(name.to_string()));
    map
}

impl KelurahanView {
    pub fn new(ctx: ViewContext) -> Self {
        Self {
            ctx,
            list: Vec::new(),
        }
    }

    pub async fn load(&mut self) -> AppResult<()> {
        self.list = self.ctx.kelurahan_list().await?;
        Ok(())
    }

    pub fn list(&self) -> &[Kelurahan] {
        &self.list
    }

    pub async fn create(&mut self, name: &str) -> AppResult<Kelurahan> {
        validate::required("name", name)?;
        let rows = self
            .ctx
            .store()
            .insert(KELURAHAN, vec![name_payload(name)])
            .await
            .inspect_err(|err| reconcile::report_failure(err, "kelurahan_create_failed"))?;
        let created: Vec<Kelurahan> = crate::model::decode_rows(rows)?;
        let first = created.first().cloned().ok_or_else(|| {
            AppError::new(STORE_DECODE, "Store returned no row for the write")
                .with_context("collection", KELURAHAN)
        })?;
        info!(target: "pipadmin", event = "kelurahan_created", id = %first.id);
        self.list.extend(created);
        Ok(first)
    }

    pub async fn rename(&mut self, id: &RecordId, name: &str) -> AppResult<()> {
        validate::required("name", name)?;
        self.ctx
            .store()
            .update(KELURAHAN, id, name_payload(name))
            .await
            .inspect_err(|err| reconcile::report_failure(err, "kelurahan_rename_failed"))?;
        if let Some(k) = self.list.iter_mut().find(|k| &k.id == id) {
            k.name = name.to_string();
        }
        Ok(())
    }

    /// Fails remotely while students or pengajuan still reference the row.
    pub async fn delete(&mut self, id: &RecordId, confirm: Option<Confirmation>) -> AppResult<()> {
        reconcile::delete_record(self.ctx.store(), KELURAHAN, id, confirm)
            .await
            .inspect_err(|err| reconcile::report_failure(err, "kelurahan_delete_failed"))?;
        self.list.retain(|k| &k.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn create_rename_delete_patch_in_place() {
        let store = Arc::new(MemoryStore::new());
        let mut view = KelurahanView::new(ViewContext::new(store.clone()));
        view.load().await.expect("load");
        assert!(view.list().is_empty());

        let created = view.create("Pasirjati").await.expect("create");
        assert_eq!(view.list().len(), 1);
        view.rename(&created.id, "Pasir Jati").await.expect("rename");
        assert_eq!(view.list()[0].name, "Pasir Jati");
        assert!(view.create("  ").await.expect_err("blank").is_validation());

        assert!(view.delete(&created.id, None).await.is_err());
        view.delete(&created.id, Some(Confirmation::granted()))
            .await
            .expect("delete");
        assert!(view.list().is_empty());
        assert!(store.rows(KELURAHAN).is_empty());
    }
}
