pub mod image_job;
