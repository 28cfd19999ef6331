pub mod cell_tables;
pub mod ecm;
