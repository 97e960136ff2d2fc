use anyhow::Result;

use gantry_core::models::TaskDef;
use gantry_core::store::NewTaskDef;

use super::core::{SqliteStore, TaskDefRow, encode_field_list};

impl SqliteStore {
    pub(super) async fn create_task_def_impl(&self, def: NewTaskDef) -> Result<TaskDef> {
        let row = sqlx::query_as::<_, TaskDefRow>(
            r#"INSERT INTO task_defs (name, capability, execution_secs, points, input_fields, output_fields, score_command)
            VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING *"#,
        )
        .bind(&def.name)
        .bind(&def.capability)
        .bind(def.execution_secs)
        .bind(def.points)
        .bind(encode_field_list(&def.input_fields))
        .bind(encode_field_list(&def.output_fields))
        .bind(&def.score_command)
        .fetch_one(&self.pool)
        .await?;
        Ok(Self::map_task_def(row))
    }

    pub(super) async fn get_task_def_impl(&self, id: i64) -> Result<Option<TaskDef>> {
        let row = sqlx::query_as::<_, TaskDefRow>("SELECT * FROM task_defs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Self::map_task_def))
    }

    pub(super) async fn get_task_def_by_name_impl(&self, name: &str) -> Result<Option<TaskDef>> {
        let row = sqlx::query_as::<_, TaskDefRow>("SELECT * FROM task_defs WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Self::map_task_def))
    }

    pub(super) async fn list_task_defs_impl(&self) -> Result<Vec<TaskDef>> {
        let rows = sqlx::query_as::<_, TaskDefRow>("SELECT * FROM task_defs ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Self::map_task_def).collect())
    }
}
