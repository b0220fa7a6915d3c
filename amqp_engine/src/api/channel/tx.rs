use super::{Channel, Expected};
use crate::{
    api::Result,
    frame::{Command, Commit, CommitOk, Rollback, RollbackOk, SelectTx, SelectTxOk},
};

impl Channel {
    /// See [tx.select](https://www.rabbitmq.com/amqp-0-9-1-reference.html#tx.select).
    pub async fn tx_select(&self) -> Result<()> {
        self.call(
            Command::new(SelectTx.into_frame()),
            Expected::Reply(SelectTxOk::header()),
            None,
        )
        .await?;
        Ok(())
    }

    /// See [tx.commit](https://www.rabbitmq.com/amqp-0-9-1-reference.html#tx.commit).
    pub async fn tx_commit(&self) -> Result<()> {
        self.call(
            Command::new(Commit.into_frame()),
            Expected::Reply(CommitOk::header()),
            None,
        )
        .await?;
        Ok(())
    }

    /// See [tx.rollback](https://www.rabbitmq.com/amqp-0-9-1-reference.html#tx.rollback).
    pub async fn tx_rollback(&self) -> Result<()> {
        self.call(
            Command::new(Rollback.into_frame()),
            Expected::Reply(RollbackOk::header()),
            None,
        )
        .await?;
        Ok(())
    }
}
