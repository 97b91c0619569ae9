//! UDB database instance lookup

use crate::api::{DescribeUDBInstanceResponse, UDBSet};
use crate::client::Params;
use crate::error::Result;
use crate::provider::{UCloudProvider, not_found};

impl UCloudProvider {
    /// Look up a database instance; an empty result is `NotFound`
    pub async fn describe_db_instance(&self, db_id: &str) -> Result<UDBSet> {
        let resp: DescribeUDBInstanceResponse = self
            .client()
            .call("DescribeUDBInstance", Params::new().set("DBId", db_id))
            .await?;

        resp.data_set
            .into_iter()
            .next()
            .ok_or_else(|| not_found("db", db_id))
    }
}
