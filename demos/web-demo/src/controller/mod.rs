pub mod user_controller;
