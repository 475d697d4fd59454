diesel::table! {
    campaigns (id) {
        id -> Uuid,
        name -> Text,
        status -> Text,
        audience -> Text,
        subject -> Text,
        body_html -> Text,
        scheduled_at -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    campaign_recipients (id) {
        id -> Uuid,
        campaign_id -> Uuid,
        contact_id -> Uuid,
        segment_id -> Nullable<Uuid>,
        status -> Text,
        message_id -> Nullable<Text>,
        failure_reason -> Nullable<Text>,
        created_at -> Timestamptz,
        processing_at -> Nullable<Timestamptz>,
        sent_at -> Nullable<Timestamptz>,
        delivered_at -> Nullable<Timestamptz>,
        opened_at -> Nullable<Timestamptz>,
        clicked_at -> Nullable<Timestamptz>,
        responded_at -> Nullable<Timestamptz>,
        bounced_at -> Nullable<Timestamptz>,
        failed_at -> Nullable<Timestamptz>,
        cancelled_at -> Nullable<Timestamptz>,
        unsubscribed_at -> Nullable<Timestamptz>,
        demo_scheduled_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    campaign_segments (id) {
        id -> Uuid,
        campaign_id -> Uuid,
        position -> Int4,
        status -> Text,
        subject_override -> Nullable<Text>,
        body_override -> Nullable<Text>,
        sent_at -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    contacts (id) {
        id -> Uuid,
        first_name -> Nullable<Text>,
        last_name -> Nullable<Text>,
        email -> Text,
        company -> Nullable<Text>,
        job_title -> Nullable<Text>,
        company_id -> Nullable<Uuid>,
        pipeline_stage -> Text,
        unsubscribed -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    deals (id) {
        id -> Uuid,
        contact_id -> Uuid,
        stage -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    sequences (id) {
        id -> Uuid,
        name -> Text,
        status -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    sequence_steps (id) {
        id -> Uuid,
        sequence_id -> Uuid,
        position -> Int4,
        delay_days -> Int4,
        send_time -> Nullable<Time>,
        subject -> Text,
        body_html -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    sequence_contacts (id) {
        id -> Uuid,
        sequence_id -> Uuid,
        contact_id -> Uuid,
        current_step -> Int4,
        status -> Text,
        next_send_at -> Nullable<Timestamptz>,
        exit_reason -> Nullable<Text>,
        enrolled_at -> Timestamptz,
        finished_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    sequence_emails (id) {
        id -> Uuid,
        sequence_id -> Uuid,
        sequence_contact_id -> Uuid,
        contact_id -> Uuid,
        step_position -> Int4,
        status -> Text,
        message_id -> Nullable<Text>,
        failure_reason -> Nullable<Text>,
        created_at -> Timestamptz,
        sent_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    email_events (id) {
        id -> Uuid,
        campaign_id -> Nullable<Uuid>,
        sequence_email_id -> Nullable<Uuid>,
        contact_id -> Uuid,
        kind -> Text,
        ip -> Nullable<Text>,
        user_agent -> Nullable<Text>,
        payload -> Jsonb,
        occurred_at -> Timestamptz,
    }
}
