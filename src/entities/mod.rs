pub mod catalog_item;
pub mod customer;
pub mod loyalty_movement;
pub mod operator;
pub mod order;
pub mod order_line;
pub mod payment;
pub mod receipt;
pub mod role_permission;
pub mod shop;
