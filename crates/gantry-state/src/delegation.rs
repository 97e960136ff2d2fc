macro_rules! impl_store_delegates {
    ($store_ty:ty, $run_migrations:path) => {
        #[async_trait::async_trait]
        impl gantry_core::store::TestbedRepository for $store_ty {
            async fn upsert_testbed_report(
                &self,
                id: &str,
                address: &str,
                capability: &str,
            ) -> anyhow::Result<gantry_core::models::ReportKind> {
                <$store_ty>::upsert_testbed_report_impl(self, id, address, capability).await
            }

            async fn record_status_report(
                &self,
                id: &str,
                reported: gantry_core::models::ReportedStatus,
            ) -> anyhow::Result<bool> {
                <$store_ty>::record_status_report_impl(self, id, reported).await
            }

            async fn apply_probe_outcome(
                &self,
                id: &str,
                outcome: gantry_core::models::ProbeOutcome,
            ) -> anyhow::Result<()> {
                <$store_ty>::apply_probe_outcome_impl(self, id, outcome).await
            }

            async fn get_testbed(
                &self,
                id: &str,
            ) -> anyhow::Result<Option<gantry_core::models::Testbed>> {
                <$store_ty>::get_testbed_impl(self, id).await
            }

            async fn list_testbeds(&self) -> anyhow::Result<Vec<gantry_core::models::Testbed>> {
                <$store_ty>::list_testbeds_impl(self).await
            }

            async fn available_testbeds(
                &self,
            ) -> anyhow::Result<Vec<gantry_core::models::Testbed>> {
                <$store_ty>::available_testbeds_impl(self).await
            }

            async fn stale_testbeds(
                &self,
                cutoff: chrono::DateTime<chrono::Utc>,
            ) -> anyhow::Result<Vec<gantry_core::models::Testbed>> {
                <$store_ty>::stale_testbeds_impl(self, cutoff).await
            }

            async fn mark_testbed_offline(
                &self,
                id: &str,
                cutoff: chrono::DateTime<chrono::Utc>,
            ) -> anyhow::Result<gantry_core::store::SweepAction> {
                <$store_ty>::mark_testbed_offline_impl(self, id, cutoff).await
            }

            async fn abandoned_testbeds(
                &self,
                cutoff: chrono::DateTime<chrono::Utc>,
            ) -> anyhow::Result<Vec<gantry_core::models::Testbed>> {
                <$store_ty>::abandoned_testbeds_impl(self, cutoff).await
            }

            async fn purge_testbed(
                &self,
                id: &str,
                cutoff: chrono::DateTime<chrono::Utc>,
            ) -> anyhow::Result<gantry_core::store::SweepAction> {
                <$store_ty>::purge_testbed_impl(self, id, cutoff).await
            }

            async fn expired_assignments(
                &self,
                now: chrono::DateTime<chrono::Utc>,
            ) -> anyhow::Result<Vec<gantry_core::models::Testbed>> {
                <$store_ty>::expired_assignments_impl(self, now).await
            }

            async fn release_expired_assignment(
                &self,
                id: &str,
                now: chrono::DateTime<chrono::Utc>,
            ) -> anyhow::Result<gantry_core::store::SweepAction> {
                <$store_ty>::release_expired_assignment_impl(self, id, now).await
            }

            async fn begin_assignment(
                &self,
                testbed_id: &str,
                task_id: i64,
                deadline: chrono::DateTime<chrono::Utc>,
                token: uuid::Uuid,
            ) -> anyhow::Result<bool> {
                <$store_ty>::begin_assignment_impl(self, testbed_id, task_id, deadline, token)
                    .await
            }

            async fn revert_assignment(
                &self,
                testbed_id: &str,
                token: uuid::Uuid,
                to_status: gantry_core::models::TestbedStatus,
                reason: &str,
            ) -> anyhow::Result<bool> {
                <$store_ty>::revert_assignment_impl(self, testbed_id, token, to_status, reason)
                    .await
            }
        }

        #[async_trait::async_trait]
        impl gantry_core::store::TaskDefRepository for $store_ty {
            async fn create_task_def(
                &self,
                def: gantry_core::store::NewTaskDef,
            ) -> anyhow::Result<gantry_core::models::TaskDef> {
                <$store_ty>::create_task_def_impl(self, def).await
            }

            async fn get_task_def(
                &self,
                id: i64,
            ) -> anyhow::Result<Option<gantry_core::models::TaskDef>> {
                <$store_ty>::get_task_def_impl(self, id).await
            }

            async fn get_task_def_by_name(
                &self,
                name: &str,
            ) -> anyhow::Result<Option<gantry_core::models::TaskDef>> {
                <$store_ty>::get_task_def_by_name_impl(self, name).await
            }

            async fn list_task_defs(&self) -> anyhow::Result<Vec<gantry_core::models::TaskDef>> {
                <$store_ty>::list_task_defs_impl(self).await
            }
        }

        #[async_trait::async_trait]
        impl gantry_core::store::SubmissionRepository for $store_ty {
            async fn enqueue_submission(
                &self,
                request: gantry_core::store::EnqueueRequest,
            ) -> anyhow::Result<(
                gantry_core::models::Submission,
                Vec<gantry_core::models::GradingTask>,
            )> {
                <$store_ty>::enqueue_submission_impl(self, request).await
            }

            async fn get_submission(
                &self,
                id: i64,
            ) -> anyhow::Result<Option<gantry_core::models::Submission>> {
                <$store_ty>::get_submission_impl(self, id).await
            }

            async fn list_submissions(
                &self,
            ) -> anyhow::Result<Vec<gantry_core::models::Submission>> {
                <$store_ty>::list_submissions_impl(self).await
            }

            async fn mark_submission_graded_if_complete(&self, id: i64) -> anyhow::Result<bool> {
                <$store_ty>::mark_submission_graded_if_complete_impl(self, id).await
            }
        }

        #[async_trait::async_trait]
        impl gantry_core::store::TaskRepository for $store_ty {
            async fn queued_tasks(&self) -> anyhow::Result<Vec<gantry_core::models::QueuedTask>> {
                <$store_ty>::queued_tasks_impl(self).await
            }

            async fn output_pending_tasks(
                &self,
            ) -> anyhow::Result<Vec<gantry_core::models::GradingTask>> {
                <$store_ty>::output_pending_tasks_impl(self).await
            }

            async fn get_task(
                &self,
                id: i64,
            ) -> anyhow::Result<Option<gantry_core::models::GradingTask>> {
                <$store_ty>::get_task_impl(self, id).await
            }

            async fn list_tasks_for_submission(
                &self,
                submission_id: i64,
            ) -> anyhow::Result<Vec<gantry_core::models::GradingTask>> {
                <$store_ty>::list_tasks_for_submission_impl(self, submission_id).await
            }

            async fn store_task_output(
                &self,
                task_id: i64,
                token: uuid::Uuid,
                outcome: gantry_core::models::ExecOutcome,
                outputs: &std::collections::HashMap<String, String>,
                note: Option<&str>,
            ) -> anyhow::Result<bool> {
                <$store_ty>::store_task_output_impl(self, task_id, token, outcome, outputs, note)
                    .await
            }

            async fn finalize_task(
                &self,
                task_id: i64,
                points: f64,
                detail: &str,
            ) -> anyhow::Result<bool> {
                <$store_ty>::finalize_task_impl(self, task_id, points, detail).await
            }

            async fn reset_task_pending(
                &self,
                task_id: i64,
                reason: &str,
            ) -> anyhow::Result<bool> {
                <$store_ty>::reset_task_pending_impl(self, task_id, reason).await
            }

            async fn mark_task_internal_error(
                &self,
                task_id: i64,
                error: &str,
            ) -> anyhow::Result<bool> {
                <$store_ty>::mark_task_internal_error_impl(self, task_id, error).await
            }

            async fn task_status_counts(&self) -> anyhow::Result<Vec<(String, i64)>> {
                <$store_ty>::task_status_counts_impl(self).await
            }
        }

        #[async_trait::async_trait]
        impl gantry_core::store::LeaseRepository for $store_ty {
            async fn acquire_lease(
                &self,
                owner_pid: i64,
                hostname: &str,
                ttl_secs: i64,
            ) -> anyhow::Result<gantry_core::store::LeaseAcquire> {
                <$store_ty>::acquire_lease_impl(self, owner_pid, hostname, ttl_secs).await
            }

            async fn renew_lease(&self, owner_pid: i64, hostname: &str) -> anyhow::Result<bool> {
                <$store_ty>::renew_lease_impl(self, owner_pid, hostname).await
            }

            async fn get_lease(
                &self,
            ) -> anyhow::Result<Option<gantry_core::models::SchedulerLease>> {
                <$store_ty>::get_lease_impl(self).await
            }

            async fn release_lease(&self, owner_pid: i64, hostname: &str) -> anyhow::Result<bool> {
                <$store_ty>::release_lease_impl(self, owner_pid, hostname).await
            }
        }

        #[async_trait::async_trait]
        impl gantry_core::store::Store for $store_ty {
            async fn run_migrations(&self) -> anyhow::Result<()> {
                $run_migrations(self).await
            }
        }
    };
}

pub(crate) use impl_store_delegates;
