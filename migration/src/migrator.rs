use sea_orm_migration::prelude::*;

use crate::migrations;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(migrations::m202608290001_create_subjects::Migration),
            Box::new(migrations::m202608290002_create_readers::Migration),
            Box::new(migrations::m202608290003_create_attendance_sessions::Migration),
            Box::new(migrations::m202608290004_create_attendance_records::Migration),
            Box::new(migrations::m202608290005_create_verification_tokens::Migration),
        ]
    }
}
