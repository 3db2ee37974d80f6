use crate::{
  entity::{subscription, user},
  prelude::*,
  sv::subscription::cancel_all_active_in,
};

pub struct User<'a> {
  db: &'a DatabaseConnection,
}

impl<'a> User<'a> {
  pub fn new(db: &'a DatabaseConnection) -> Self {
    Self { db }
  }

  pub async fn get_or_create(
    &self,
    tg_user_id: i64,
    username: Option<&str>,
  ) -> Result<user::Model> {
    if let Some(user) =
      user::Entity::find_by_id(tg_user_id).one(self.db).await?
    {
      return Ok(user);
    }

    let user = user::ActiveModel {
      tg_user_id: Set(tg_user_id),
      username: Set(username.map(str::to_string)),
      is_blocked: Set(false),
      trial_used: Set(false),
      invited_by: Set(None),
      reg_date: Set(utils::now()),
    };

    Ok(user.insert(self.db).await?)
  }

  /// Registers a user from `/start`, keeping the username fresh. The inviter is
  /// recorded once and never points at the user itself.
  pub async fn register(
    &self,
    tg_user_id: i64,
    username: Option<&str>,
    invited_by: Option<i64>,
  ) -> Result<user::Model> {
    let user = self.get_or_create(tg_user_id, username).await?;

    let inviter = match invited_by {
      Some(id) if id != tg_user_id && user.invited_by.is_none() => {
        user::Entity::find_by_id(id).one(self.db).await?.map(|u| u.tg_user_id)
      }
      _ => None,
    };

    let username = username.map(str::to_string);
    let renamed = username.is_some() && username != user.username;
    if inviter.is_none() && !renamed {
      return Ok(user);
    }

    let mut active: user::ActiveModel = user.into();
    if inviter.is_some() {
      active.invited_by = Set(inviter);
    }
    if renamed {
      active.username = Set(username);
    }

    Ok(active.update(self.db).await?)
  }

  pub async fn by_id(&self, tg_user_id: i64) -> Result<Option<user::Model>> {
    let user = user::Entity::find_by_id(tg_user_id).one(self.db).await?;
    Ok(user)
  }

  /// Blocks or unblocks a user. Blocking also cancels every active
  /// subscription, returned so the caller can retire their configs.
  pub async fn set_blocked(
    &self,
    tg_user_id: i64,
    blocked: bool,
  ) -> Result<Vec<subscription::Model>> {
    let txn = self.db.begin().await?;

    let user = user::Entity::find_by_id(tg_user_id)
      .one(&txn)
      .await?
      .ok_or(Error::UserNotFound)?;

    user::ActiveModel { is_blocked: Set(blocked), ..user.into() }
      .update(&txn)
      .await?;

    let cancelled = if blocked {
      cancel_all_active_in(&txn, tg_user_id, "User blocked").await?
    } else {
      Vec::new()
    };

    txn.commit().await?;
    Ok(cancelled)
  }

  pub async fn invited_count(&self, tg_user_id: i64) -> Result<u64> {
    let count = user::Entity::find()
      .filter(user::Column::InvitedBy.eq(tg_user_id))
      .count(self.db)
      .await?;
    Ok(count)
  }

  pub async fn count(&self) -> Result<u64> {
    Ok(user::Entity::find().count(self.db).await?)
  }
}
