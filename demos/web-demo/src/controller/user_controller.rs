use crate::service::{CreateUserRequest, UserService};
use circuit_web::prelude::*;
use circuit_web::inventory;
use std::sync::Arc;

/// 用户控制器，构造参数 `userService` 由 AutowireController 装配
pub struct UserController {
    users: Arc<UserService>,
}

#[async_trait]
impl Controller for UserController {
    async fn call(
        &self,
        method: &str,
        request: &mut Request,
        args: BoundArgs,
    ) -> anyhow::Result<HandlerOutput> {
        match method {
            "list" => HandlerOutput::serialize(&self.users.list_users()),
            "show" => {
                let id: u32 = args.value("id")?;
                let user = self
                    .users
                    .get_user_by_id(id)
                    .ok_or_else(|| HttpError::not_found(format!("User {} not found", id)))?;
                HandlerOutput::serialize(&user)
            }
            "create" => {
                let payload: CreateUserRequest = serde_json::from_slice(request.body())
                    .map_err(|e| HttpError::bad_request(format!("Invalid user payload: {}", e)))?;
                let user = self.users.create_user(payload);
                tracing::info!(id = user.id, "User created");
                let body = serde_json::to_value(&user)?;
                Ok(response::json(StatusCode::CREATED, &body).into())
            }
            other => Err(RouterError::UnknownMethod {
                class: "UserController".to_string(),
                method: other.to_string(),
            }
            .into()),
        }
    }
}

fn definition() -> ControllerDefinition {
    ControllerDefinition::new("UserController", |args| {
        let users = args.require::<UserService>("userService")?;
        Ok(Arc::new(UserController { users }) as Arc<dyn Controller>)
    })
    .constructor(["userService"])
    .method("list", ["request"])
    .method("show", ["request", "id"])
    .method("create", ["request"])
}

inventory::submit! {
    ControllerRegistration {
        name: "UserController",
        definition,
    }
}
