use super::*;
use rpc::query_admin_server::{QueryAdmin, QueryAdminServer};

/// gRPC front end of a [`QueryManager`].
pub struct AdminService {
    manager: Arc<QueryManager>,
}

impl AdminService {
    pub fn new(manager: Arc<QueryManager>) -> Self {
        Self { manager }
    }

    pub fn into_server(self) -> QueryAdminServer<Self> {
        QueryAdminServer::new(self)
    }

    fn resolve(&self, query: &str) -> Result<QueryHandle, Status> {
        self.manager
            .find(query)
            .ok_or_else(|| Status::not_found(format!("query '{query}'")))
    }
}

#[tonic::async_trait]
impl QueryAdmin for AdminService {
    async fn list_queries(
        &self,
        request: Request<rpc::ListQueriesRequest>,
    ) -> Result<Response<rpc::ListQueriesResponse>, Status> {
        let req = request.into_inner();
        let handles = if req.active_only {
            self.manager.active()
        } else {
            self.manager.queries()
        };
        Ok(Response::new(rpc::ListQueriesResponse {
            queries: handles.iter().map(|h| h.status().into()).collect(),
            tables: self.manager.table_names(),
        }))
    }

    async fn get_query_status(
        &self,
        request: Request<rpc::QueryRef>,
    ) -> Result<Response<rpc::QueryStatusReply>, Status> {
        let handle = self.resolve(&request.into_inner().query)?;
        Ok(Response::new(handle.status().into()))
    }

    async fn get_recent_progress(
        &self,
        request: Request<rpc::QueryRef>,
    ) -> Result<Response<rpc::RecentProgressReply>, Status> {
        let handle = self.resolve(&request.into_inner().query)?;
        Ok(Response::new(rpc::RecentProgressReply {
            progress: handle
                .recent_progress()
                .into_iter()
                .map(Into::into)
                .collect(),
        }))
    }

    async fn stop_query(
        &self,
        request: Request<rpc::QueryRef>,
    ) -> Result<Response<rpc::QueryStatusReply>, Status> {
        let handle = self.resolve(&request.into_inner().query)?;
        tracing::info!(query_id = %handle.id(), "stop requested over admin rpc");
        // stop() joins the scheduler thread.
        let handle = tokio::task::spawn_blocking(move || {
            handle.stop();
            handle
        })
        .await
        .map_err(|e| Status::internal(format!("stop task failed: {e}")))?;
        Ok(Response::new(handle.status().into()))
    }

    async fn read_table(
        &self,
        request: Request<rpc::ReadTableRequest>,
    ) -> Result<Response<rpc::ReadTableReply>, Status> {
        let name = request.into_inner().table;
        let table = self.manager.table(&name).map_err(super::convert::to_status)?;
        Ok(Response::new(super::convert::table_reply(&name, &table)))
    }
}

/// Serve the admin API on `addr` until the process exits.
pub async fn serve(manager: Arc<QueryManager>, addr: SocketAddr) -> Result<()> {
    tracing::info!(%addr, "admin service listening");
    tonic::transport::Server::builder()
        .add_service(AdminService::new(manager).into_server())
        .serve(addr)
        .await
        .with_context(|| format!("admin service on {addr} failed"))
}

/// Serve the admin API on an already bound listener until `shutdown` flips to true.
pub async fn serve_with_shutdown(
    manager: Arc<QueryManager>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "admin service listening");
    tonic::transport::Server::builder()
        .add_service(AdminService::new(manager).into_server())
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .with_context(|| format!("admin service on {addr} failed"))
}
