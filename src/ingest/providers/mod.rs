pub mod lodestone;
