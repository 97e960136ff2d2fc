pub mod api;

mod api_routes;
mod handlers;
