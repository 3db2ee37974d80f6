use crate::{entity::tariff, prelude::*};

struct Seed {
  code: &'static str,
  name: &'static str,
  description: &'static str,
  duration_days: i32,
  price: i64,
  allowed_devices: i32,
}

const DEFAULTS: [Seed; 4] = [
  Seed {
    code: "WEEK",
    name: "1 week",
    description: "7 days of VPN access",
    duration_days: 7,
    price: 100,
    allowed_devices: 1,
  },
  Seed {
    code: "MONTH",
    name: "1 month",
    description: "30 days of VPN access",
    duration_days: 30,
    price: 400,
    allowed_devices: 1,
  },
  Seed {
    code: "3MONTH",
    name: "3 months",
    description: "90 days of VPN access for two devices",
    duration_days: 90,
    price: 1000,
    allowed_devices: 2,
  },
  Seed {
    code: tariff::TRIAL_CODE,
    name: "Trial",
    description: "Free trial",
    duration_days: 1,
    price: 0,
    allowed_devices: 1,
  },
];

pub struct Tariff<'a> {
  db: &'a DatabaseConnection,
}

impl<'a> Tariff<'a> {
  pub fn new(db: &'a DatabaseConnection) -> Self {
    Self { db }
  }

  pub async fn by_id(&self, id: i32) -> Result<Option<tariff::Model>> {
    Ok(tariff::Entity::find_by_id(id).one(self.db).await?)
  }

  pub async fn by_code(&self, code: &str) -> Result<Option<tariff::Model>> {
    let tariff = tariff::Entity::find()
      .filter(tariff::Column::Code.eq(code))
      .one(self.db)
      .await?;
    Ok(tariff)
  }

  /// Active paid tariffs, cheapest first.
  pub async fn for_sale(&self) -> Result<Vec<tariff::Model>> {
    let tariffs = tariff::Entity::find()
      .filter(tariff::Column::IsActive.eq(true))
      .filter(tariff::Column::Code.ne(tariff::TRIAL_CODE))
      .order_by_asc(tariff::Column::Price)
      .all(self.db)
      .await?;
    Ok(tariffs)
  }

  pub async fn all(&self) -> Result<Vec<tariff::Model>> {
    let tariffs = tariff::Entity::find()
      .order_by_asc(tariff::Column::Id)
      .all(self.db)
      .await?;
    Ok(tariffs)
  }

  /// Flips `is_active`, returning the updated tariff.
  pub async fn toggle(&self, id: i32) -> Result<tariff::Model> {
    let tariff = self.by_id(id).await?.ok_or(Error::TariffNotFound)?;
    let active = !tariff.is_active;

    let tariff = tariff::ActiveModel { is_active: Set(active), ..tariff.into() }
      .update(self.db)
      .await?;
    Ok(tariff)
  }

  /// Inserts the default catalog into an empty table.
  pub async fn seed_defaults(&self) -> Result<usize> {
    if tariff::Entity::find().count(self.db).await? > 0 {
      return Ok(0);
    }

    let now = utils::now();
    let models = DEFAULTS.iter().map(|seed| tariff::ActiveModel {
      id: NotSet,
      code: Set(seed.code.into()),
      name: Set(seed.name.into()),
      description: Set(Some(seed.description.into())),
      duration_days: Set(seed.duration_days),
      price: Set(seed.price),
      allowed_devices: Set(seed.allowed_devices),
      is_active: Set(true),
      created_at: Set(now),
    });

    tariff::Entity::insert_many(models).exec(self.db).await?;
    Ok(DEFAULTS.len())
  }
}
