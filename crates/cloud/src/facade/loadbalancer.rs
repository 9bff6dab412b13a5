use tracing::debug;

use cumulus_core::{Attempt, Call, Error, Operation, ResourceKind, Result};

use super::Cloud;
use crate::api::all_pages;
use crate::types::{
    Listener, ListenerCreateOpts, LoadBalancer, LoadBalancerCreateOpts, Pool, PoolCreateOpts,
    PoolMember, PoolMemberCreateOpts, PROVISIONING_ACTIVE, PROVISIONING_ERROR,
};

impl Cloud {
    /// # Errors
    /// `NotFound` when no load balancer has this ID.
    pub async fn get_loadbalancer(&self, id: &str) -> Result<LoadBalancer> {
        let call = Call::get(ResourceKind::LoadBalancer, id);
        self.read(&call, || self.clients.loadbalancer.get_loadbalancer(id))
            .await
    }

    /// # Errors
    /// Surfaces the listing failure after the read budget is spent.
    pub async fn list_loadbalancers(&self) -> Result<Vec<LoadBalancer>> {
        let call = Call::list(ResourceKind::LoadBalancer, "*");
        self.read(&call, || {
            all_pages(|page| self.clients.loadbalancer.list_loadbalancers(page))
        })
        .await
    }

    /// # Errors
    /// Surfaces the create failure after the write budget is spent.
    pub async fn create_loadbalancer(&self, opts: &LoadBalancerCreateOpts) -> Result<LoadBalancer> {
        let call = Call::create(ResourceKind::LoadBalancer, opts.name.as_str());
        self.write(&call, || self.clients.loadbalancer.create_loadbalancer(opts))
            .await
    }

    /// # Errors
    /// Surfaces the delete failure after the write budget is spent.
    pub async fn delete_loadbalancer(&self, id: &str) -> Result<()> {
        let call = Call::delete(ResourceKind::LoadBalancer, id);
        self.delete(&call, || self.clients.loadbalancer.delete_loadbalancer(id))
            .await
    }

    /// Wait for a load balancer to finish provisioning.
    ///
    /// # Errors
    /// `Conflict` when provisioning ends in `ERROR`, `ConvergenceTimeout`
    /// when it has not finished within the poll budget.
    pub async fn wait_for_loadbalancer_active(&self, id: &str) -> Result<LoadBalancer> {
        let call = Call::new(ResourceKind::LoadBalancer, Operation::Poll, id);
        let call_ref = &call;
        self.poll(call_ref, move || async move {
            let lb = self
                .clients
                .loadbalancer
                .get_loadbalancer(id)
                .await
                .map_err(|e| e.into_error(call_ref))?;
            match lb.provisioning_status.as_str() {
                PROVISIONING_ACTIVE => Ok(Attempt::Done(lb)),
                PROVISIONING_ERROR => Err(Error::conflict(
                    call_ref,
                    "load balancer provisioning ended in ERROR",
                )),
                status => {
                    debug!(loadbalancer_id = id, status, "Load balancer not active yet");
                    Ok(Attempt::Pending)
                }
            }
        })
        .await
    }

    /// # Errors
    /// Surfaces the listing failure after the read budget is spent.
    pub async fn list_pools(&self) -> Result<Vec<Pool>> {
        let call = Call::list(ResourceKind::LbPool, "*");
        self.read(&call, || {
            all_pages(|page| self.clients.loadbalancer.list_pools(page))
        })
        .await
    }

    /// # Errors
    /// Surfaces the create failure after the write budget is spent.
    pub async fn create_pool(&self, opts: &PoolCreateOpts) -> Result<Pool> {
        let call = Call::create(ResourceKind::LbPool, opts.name.as_str());
        self.write(&call, || self.clients.loadbalancer.create_pool(opts))
            .await
    }

    /// # Errors
    /// Surfaces the listing failure after the read budget is spent.
    pub async fn list_listeners(&self) -> Result<Vec<Listener>> {
        let call = Call::list(ResourceKind::LbListener, "*");
        self.read(&call, || {
            all_pages(|page| self.clients.loadbalancer.list_listeners(page))
        })
        .await
    }

    /// # Errors
    /// Surfaces the create failure after the write budget is spent.
    pub async fn create_listener(&self, opts: &ListenerCreateOpts) -> Result<Listener> {
        let call = Call::create(ResourceKind::LbListener, opts.name.as_str());
        self.write(&call, || self.clients.loadbalancer.create_listener(opts))
            .await
    }

    /// Replace the source CIDRs a listener accepts.
    ///
    /// # Errors
    /// Surfaces the update failure after the write budget is spent.
    pub async fn update_listener_allowed_cidrs(
        &self,
        id: &str,
        allowed_cidrs: &[String],
    ) -> Result<Listener> {
        let call = Call::update(ResourceKind::LbListener, id);
        self.write(&call, || {
            self.clients.loadbalancer.update_listener(id, allowed_cidrs)
        })
        .await
    }

    /// # Errors
    /// Surfaces the listing failure after the read budget is spent.
    pub async fn list_pool_members(&self, pool_id: &str) -> Result<Vec<PoolMember>> {
        let call = Call::list(ResourceKind::PoolMember, pool_id);
        self.read(&call, || {
            all_pages(|page| self.clients.loadbalancer.list_pool_members(pool_id, page))
        })
        .await
    }

    /// # Errors
    /// Surfaces the create failure after the write budget is spent.
    pub async fn add_pool_member(
        &self,
        pool_id: &str,
        opts: &PoolMemberCreateOpts,
    ) -> Result<PoolMember> {
        let call = Call::create(ResourceKind::PoolMember, opts.name.as_str());
        self.write(&call, || {
            self.clients.loadbalancer.create_pool_member(pool_id, opts)
        })
        .await
    }
}
