use async_trait::async_trait;
use rusqlite::Row;
use shardmap_core::UnitOfWork;
use time::{Date, OffsetDateTime};

use crate::connector::{ShardConnection, SqliteConnector};
use crate::db::FromRow;
use crate::error::SqliteShardError;

static UPSERT_CUSTOMER: &str = "INSERT INTO customers (customer_id, name, region_id)
    VALUES (?1, ?2, ?3)
    ON CONFLICT (customer_id) DO UPDATE SET name = excluded.name, region_id = excluded.region_id;";
static INSERT_ORDER: &str = "INSERT INTO orders (customer_id, order_date, product_id)
    VALUES (?1, ?2, ?3);";
static SELECT_CUSTOMER: &str =
    "SELECT customer_id, name, region_id FROM customers WHERE customer_id = ?1;";
static COUNT_ORDERS: &str = "SELECT COUNT(*) FROM orders WHERE customer_id = ?1;";

#[derive(Debug, Clone, PartialEq, Eq)]
/// A row of the `customers` table.
pub struct Customer {
    pub customer_id: i64,
    pub name: String,
    pub region_id: i64,
}

impl FromRow for Customer {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            customer_id: row.get(0)?,
            name: row.get(1)?,
            region_id: row.get(2)?,
        })
    }
}

#[derive(Debug, Clone)]
/// Adds a customer, or updates the customer if the id already exists.
///
/// Running this several times leaves a single row with the latest values,
/// so it is safe to retry.
pub struct UpsertCustomer(Customer);

impl UpsertCustomer {
    pub fn new(customer_id: i64, name: impl Into<String>, region_id: i64) -> Self {
        Self(Customer {
            customer_id,
            name: name.into(),
            region_id,
        })
    }
}

#[async_trait]
impl UnitOfWork<SqliteConnector> for UpsertCustomer {
    type Output = usize;

    async fn run(&self, conn: &mut ShardConnection) -> Result<usize, SqliteShardError> {
        let customer = &self.0;
        conn.handle()
            .execute(
                UPSERT_CUSTOMER,
                (customer.customer_id, customer.name.clone(), customer.region_id),
            )
            .await
    }
}

#[derive(Debug, Clone)]
/// Adds an order for a customer, returning the new order id.
///
/// Orders are keyed by a generated id, a retry after a lost acknowledgement
/// can record the order twice.
pub struct InsertOrder {
    customer_id: i64,
    product_id: i64,
    order_date: Date,
}

impl InsertOrder {
    pub fn new(customer_id: i64, product_id: i64, order_date: Date) -> Self {
        Self {
            customer_id,
            product_id,
            order_date,
        }
    }

    /// An order placed today (UTC).
    pub fn today(customer_id: i64, product_id: i64) -> Self {
        Self::new(customer_id, product_id, OffsetDateTime::now_utc().date())
    }
}

#[async_trait]
impl UnitOfWork<SqliteConnector> for InsertOrder {
    type Output = i64;

    async fn run(&self, conn: &mut ShardConnection) -> Result<i64, SqliteShardError> {
        conn.handle()
            .insert(
                INSERT_ORDER,
                (self.customer_id, self.order_date.to_string(), self.product_id),
            )
            .await
    }
}

#[derive(Debug, Clone)]
/// Reads a customer by id.
pub struct GetCustomer {
    customer_id: i64,
}

impl GetCustomer {
    pub fn new(customer_id: i64) -> Self {
        Self { customer_id }
    }
}

#[async_trait]
impl UnitOfWork<SqliteConnector> for GetCustomer {
    type Output = Option<Customer>;

    async fn run(&self, conn: &mut ShardConnection) -> Result<Option<Customer>, SqliteShardError> {
        conn.handle()
            .fetch_one(SELECT_CUSTOMER, (self.customer_id,))
            .await
    }
}

struct Count(i64);

impl FromRow for Count {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        row.get(0).map(Self)
    }
}

#[derive(Debug, Clone)]
/// Counts the orders placed by a customer.
pub struct CountOrders {
    customer_id: i64,
}

impl CountOrders {
    pub fn new(customer_id: i64) -> Self {
        Self { customer_id }
    }
}

#[async_trait]
impl UnitOfWork<SqliteConnector> for CountOrders {
    type Output = i64;

    async fn run(&self, conn: &mut ShardConnection) -> Result<i64, SqliteShardError> {
        let count = conn
            .handle()
            .fetch_one::<_, Count>(COUNT_ORDERS, (self.customer_id,))
            .await?;
        Ok(count.map(|c| c.0).unwrap_or_default())
    }
}
