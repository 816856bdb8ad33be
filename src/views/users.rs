use serde_json::{Map, Value};
use tracing::{info, warn};

use super::ViewContext;
use crate::error::AppResult;
use crate::join::{join_kelurahan, KelurahanIndex};
use crate::model::{decode_rows, Kelurahan, RecordId, Role, UserProfile, PROFILES};
use crate::reconcile::{self, Confirmation};
use crate::session::{SessionProvider, SignUpMeta};
use crate::store::Select;
use crate::validate::{self, ProfileForm};

/// User management. Profiles are joined to kelurahan names in memory.
pub struct UsersView {
    ctx: ViewContext,
    users: Vec<UserProfile>,
    kelurahan: Vec<Kelurahan>,
}

fn profile_payload(form: &ProfileForm, role: Role, kelurahan_id: &RecordId) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("nama".into(), Value::String(form.nama.clone()));
    map.insert("email".into(), Value::String(form.email.clone()));
    map.insert("role".into(), Value::String(role.as_str().to_string()));
    map.insert("kelurahan_id".into(), kelurahan_id.to_value());
    map
}

impl UsersView {
    pub fn new(ctx: ViewContext) -> Self {
        Self {
            ctx,
            users: Vec::new(),
            kelurahan: Vec::new(),
        }
    }

    pub async fn load(&mut self) -> AppResult<()> {
        let query = Select::from(PROFILES)
            .columns(&["id", "nama", "email", "role", "kelurahan_id"])
            .order("nama", true);
        let rows = self.ctx.store().select(&query).await?;
        let mut users: Vec<UserProfile> = decode_rows(rows)?;
        self.kelurahan = self.ctx.kelurahan_list().await?;
        join_kelurahan(&mut users, &KelurahanIndex::new(&self.kelurahan));
        info!(target: "pipadmin", event = "users_loaded", rows = users.len());
        self.users = users;
        Ok(())
    }

    pub fn users(&self) -> &[UserProfile] {
        &self.users
    }

    pub fn kelurahan(&self) -> &[Kelurahan] {
        &self.kelurahan
    }

    pub fn find(&self, id: &RecordId) -> Option<&UserProfile> {
        self.users.iter().find(|u| &u.id == id)
    }

    pub async fn update(&mut self, id: &RecordId, form: &ProfileForm) -> AppResult<()> {
        let role = form.validate()?;
        let kelurahan_id = validate::required_kelurahan(&form.kelurahan_id)?;
        self.ctx
            .store()
            .update(PROFILES, id, profile_payload(form, role, &kelurahan_id))
            .await
            .inspect_err(|err| reconcile::report_failure(err, "profile_update_failed"))?;
        info!(target: "pipadmin", event = "profile_updated", id = %id);
        self.load().await
    }

    /// Create the auth account, then its profile row. A missing user id in
    /// the sign-up reply means the account awaits email confirmation and no
    /// profile is written yet.
    pub async fn create(
        &mut self,
        form: &ProfileForm,
        password: &str,
        auth: &dyn SessionProvider,
    ) -> AppResult<Option<String>> {
        let role = form.validate()?;
        validate::required("password", password)?;
        let kelurahan_id = validate::required_kelurahan(&form.kelurahan_id)?;

        let meta = SignUpMeta {
            nama: form.nama.clone(),
            role: role.as_str().to_string(),
            kelurahan_id: form.kelurahan_id.clone(),
        };
        let user_id = auth
            .sign_up(&form.email, password, &meta)
            .await
            .inspect_err(|err| reconcile::report_failure(err, "user_sign_up_failed"))?;

        if let Some(user_id) = &user_id {
            let mut payload = profile_payload(form, role, &kelurahan_id);
            payload.insert("id".into(), Value::String(user_id.clone()));
            if let Err(err) = self.ctx.store().upsert(PROFILES, vec![payload]).await {
                warn!(
                    target: "pipadmin",
                    event = "profile_upsert_failed",
                    user_id = %user_id,
                    error = %err.message()
                );
                return Err(err.with_context("auth_user_id", user_id.clone()));
            }
            info!(target: "pipadmin", event = "user_created", id = %user_id);
        }
        self.load().await?;
        Ok(user_id)
    }

    pub async fn delete(&mut self, id: &RecordId, confirm: Option<Confirmation>) -> AppResult<()> {
        reconcile::delete_record(self.ctx.store(), PROFILES, id, confirm)
            .await
            .inspect_err(|err| reconcile::report_failure(err, "profile_delete_failed"))?;
        self.users.retain(|u| &u.id != id);
        Ok(())
    }
}
